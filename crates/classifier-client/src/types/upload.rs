use serde::{Deserialize, Serialize};

/// Response of a successful file upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    /// Location on the server; pass this to a classification request.
    pub file_path: String,
    #[serde(default)]
    pub message: String,
}
