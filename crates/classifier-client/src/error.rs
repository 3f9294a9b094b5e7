use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("stream ended without a terminal event")]
    StreamTruncated,

    /// Failure reported by the backend through an `error` event.
    /// Displays the backend message verbatim.
    #[error("{0}")]
    Job(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClassifyError {
    /// Request setup failure, network interruption or truncated stream.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClassifyError::Http { .. }
                | ClassifyError::Request(_)
                | ClassifyError::Transport(_)
                | ClassifyError::StreamTruncated
        )
    }

    pub fn is_job_error(&self) -> bool {
        matches!(self, ClassifyError::Job(_))
    }
}

/// A line carried the event marker but its payload could not be decoded.
/// Recovered inside the parser; never returned from a job run.
#[derive(Error, Debug)]
pub enum ProtocolParseError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("invalid `{kind}` event: {source}")]
    InvalidEvent {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ClassifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_displays_message_verbatim() {
        let err = ClassifyError::Job("bad file".to_string());
        assert_eq!(err.to_string(), "bad file");
        assert!(err.is_job_error());
        assert!(!err.is_transport());
    }

    #[test]
    fn test_truncated_stream_is_transport_error() {
        let err = ClassifyError::StreamTruncated;
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "stream ended without a terminal event");
    }

    #[test]
    fn test_http_error_is_transport_error() {
        let err = ClassifyError::Http {
            status: 404,
            body: "not found".to_string(),
        };
        assert!(err.is_transport());
        assert!(err.to_string().contains("404"));
    }
}
