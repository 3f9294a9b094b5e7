use serde::{Deserialize, Serialize};

/// Parameters of a classification job.
///
/// Optional fields left as `None` are omitted from the request body so the
/// backend falls back to its own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    /// Server-side path returned by an upload.
    pub file_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ClassificationRequest {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            sheet_name: None,
            column_name: None,
            prompt: None,
        }
    }

    pub fn with_sheet(mut self, sheet_name: impl Into<String>) -> Self {
        self.sheet_name = Some(sheet_name.into());
        self
    }

    pub fn with_column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = Some(column_name.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_unset_fields() {
        let request = ClassificationRequest::new("/data/uploads/a.xlsx");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value, json!({"file_path": "/data/uploads/a.xlsx"}));
    }

    #[test]
    fn test_request_builder() {
        let request = ClassificationRequest::new("/data/uploads/a.xlsx")
            .with_sheet("Sheet1")
            .with_column("Issue")
            .with_prompt("Extract the defect name");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["sheet_name"], "Sheet1");
        assert_eq!(value["column_name"], "Issue");
        assert_eq!(value["prompt"], "Extract the defect name");
    }
}
