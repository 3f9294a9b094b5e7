use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolParseError;

/// Row-level progress of a running classification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(current: u64, total: u64) -> Self {
        Self { current, total }
    }

    /// Completed share in `0.0..=1.0`; zero when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Payload of the terminal `complete` event.
///
/// Every field is passed through exactly as the backend sent it, so callers
/// see the same names and JSON values the server produced. Missing fields
/// come through as `null`; anything else on the record, the `type`
/// discriminator included, lands in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub history_id: Value,
    #[serde(default)]
    pub filename: Value,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub total_rows: Value,
    #[serde(default)]
    pub processed_rows: Value,
    #[serde(default)]
    pub failed_rows: Value,
    #[serde(default)]
    pub result_path: Value,
    #[serde(default)]
    pub message: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobResult {
    /// History id rendered for use in a URL path.
    pub fn history_key(&self) -> Option<String> {
        match &self.history_id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn message_text(&self) -> Option<&str> {
        self.message.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ErrorEvent {
    message: String,
}

/// One decoded event record from the job stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Progress(Progress),
    Complete(JobResult),
    Error { message: String },
}

impl EventPayload {
    pub const PROGRESS: &'static str = "progress";
    pub const COMPLETE: &'static str = "complete";
    pub const ERROR: &'static str = "error";

    /// Interpret a decoded JSON payload by its `type` field.
    ///
    /// Returns `Ok(None)` for objects whose `type` is missing or not one of
    /// the three known kinds; those records are not dispatched.
    pub fn from_value(value: Value) -> Result<Option<Self>, ProtocolParseError> {
        let Value::Object(map) = value else {
            return Err(ProtocolParseError::NotAnObject);
        };

        let kind = match map.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_owned(),
            None => return Ok(None),
        };

        let event = match kind.as_str() {
            Self::PROGRESS => serde_json::from_value::<Progress>(Value::Object(map))
                .map(EventPayload::Progress)
                .map_err(|source| ProtocolParseError::InvalidEvent {
                    kind: Self::PROGRESS,
                    source,
                })?,
            Self::COMPLETE => serde_json::from_value::<JobResult>(Value::Object(map))
                .map(EventPayload::Complete)
                .map_err(|source| ProtocolParseError::InvalidEvent {
                    kind: Self::COMPLETE,
                    source,
                })?,
            Self::ERROR => serde_json::from_value::<ErrorEvent>(Value::Object(map))
                .map(|e| EventPayload::Error { message: e.message })
                .map_err(|source| ProtocolParseError::InvalidEvent {
                    kind: Self::ERROR,
                    source,
                })?,
            other => {
                tracing::debug!(event_type = other, "Ignoring unrecognised event type");
                return Ok(None);
            }
        };

        Ok(Some(event))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventPayload::Progress(_))
    }
}

/// Final result of a streaming classification job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobResult),
    /// The caller cancelled before any terminal event arrived.
    Cancelled,
}

impl JobOutcome {
    pub fn into_result(self) -> Option<JobResult> {
        match self {
            JobOutcome::Completed(result) => Some(result),
            JobOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_event() {
        let value = json!({"type": "progress", "current": 3, "total": 10});
        let event = EventPayload::from_value(value).unwrap().unwrap();
        assert_eq!(event, EventPayload::Progress(Progress::new(3, 10)));
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_negative_progress_is_invalid() {
        let value = json!({"type": "progress", "current": -1, "total": 10});
        assert!(EventPayload::from_value(value).is_err());
    }

    #[test]
    fn test_complete_event_passes_fields_through() {
        let value = json!({
            "type": "complete",
            "history_id": 7,
            "filename": "report.xlsx",
            "status": "completed",
            "total_rows": 10,
            "processed_rows": 9,
            "failed_rows": 1,
            "result_path": "/data/results/classified_report.xlsx",
            "message": "done",
            "elapsed_ms": 1200
        });

        match EventPayload::from_value(value).unwrap().unwrap() {
            EventPayload::Complete(result) => {
                assert_eq!(result.history_id, json!(7));
                assert_eq!(result.history_key().as_deref(), Some("7"));
                assert_eq!(result.failed_rows, json!(1));
                assert_eq!(result.message_text(), Some("done"));
                assert_eq!(result.extra.get("elapsed_ms"), Some(&json!(1200)));
                assert_eq!(result.extra.get("type"), Some(&json!("complete")));
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_complete_record_passes_through_verbatim() {
        let record = json!({
            "type": "complete",
            "history_id": 3,
            "filename": "일보.xlsx",
            "status": "completed",
            "total_rows": 2,
            "processed_rows": 2,
            "failed_rows": 0,
            "result_path": "/app/data/results/classified_일보.xlsx",
            "message": "분류가 완료되었습니다.",
            "model": "gpt-4o-mini"
        });

        let EventPayload::Complete(result) = EventPayload::from_value(record.clone()).unwrap().unwrap() else {
            panic!("Expected Complete");
        };
        assert_eq!(serde_json::to_value(&result).unwrap(), record);
    }

    #[test]
    fn test_complete_event_with_missing_fields() {
        let value = json!({"type": "complete", "history_id": "h1"});
        match EventPayload::from_value(value).unwrap().unwrap() {
            EventPayload::Complete(result) => {
                assert_eq!(result.history_key().as_deref(), Some("h1"));
                assert_eq!(result.result_path, Value::Null);
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_error_event() {
        let value = json!({"type": "error", "message": "bad file"});
        let event = EventPayload::from_value(value).unwrap().unwrap();
        assert_eq!(
            event,
            EventPayload::Error {
                message: "bad file".to_string()
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn test_error_event_without_message_is_invalid() {
        let value = json!({"type": "error"});
        assert!(EventPayload::from_value(value).is_err());
    }

    #[test]
    fn test_unknown_and_missing_type_are_ignored() {
        let start = json!({"type": "start", "total": 5});
        assert!(EventPayload::from_value(start).unwrap().is_none());

        let untyped = json!({"current": 1, "total": 2});
        assert!(EventPayload::from_value(untyped).unwrap().is_none());
    }

    #[test]
    fn test_non_object_payload_is_invalid() {
        assert!(EventPayload::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(Progress::new(5, 10).fraction(), 0.5);
        assert_eq!(Progress::new(5, 0).fraction(), 0.0);
    }
}
