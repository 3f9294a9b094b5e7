use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::error::Result;

/// Response body delivered incrementally, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Source of streamed job responses.
///
/// Implementations must hand back the body before it is fully received;
/// buffering the whole response defeats live progress.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// POST `body` as JSON to `path` and return the response body as a stream.
    ///
    /// Fails before yielding any data on network errors or non-2xx statuses.
    async fn open_stream(&self, path: &str, body: &Value) -> Result<ByteStream>;
}

#[async_trait]
impl<T: StreamTransport + ?Sized> StreamTransport for std::sync::Arc<T> {
    async fn open_stream(&self, path: &str, body: &Value) -> Result<ByteStream> {
        (**self).open_stream(path, body).await
    }
}
