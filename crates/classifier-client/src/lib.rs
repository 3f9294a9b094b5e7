pub mod buffer_utils;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod streaming;
pub mod transport;
pub mod types;

pub use buffer_utils::{LineBuffer, EVENT_MARKER};
pub use client::ApiClient;
pub use config::ClientConfig;
pub use error::{ClassifyError, Result};
pub use job::{drive, ChannelProgressSink, JobState, ProgressSink, StreamingJobClient, STREAM_PATH};
pub use streaming::{EventPayload, JobOutcome, JobResult, Progress};
pub use transport::{ByteStream, StreamTransport};
pub use types::{ClassificationRequest, UploadedFile};
pub use tokio_util::sync::CancellationToken;
