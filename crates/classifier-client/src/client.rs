// HTTP client for the classification backend

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::ClientConfig;
use crate::error::{ClassifyError, Result};
use crate::transport::{ByteStream, StreamTransport};
use crate::types::{ClassificationRequest, UploadedFile};

/// REST client for the backend API (reqwest, no SDK)
///
/// Also serves as the streaming transport for [`crate::StreamingJobClient`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.normalized_base_url()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Apply the REST timeout to a short-lived request
    fn rest(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), %body, "Backend returned an error status");
        Err(ClassifyError::Http {
            status: status.as_u16(),
            body,
        })
    }

    /// `GET /settings`
    pub async fn get_settings(&self) -> Result<Value> {
        let response = self.rest(self.http_client.get(self.url("/settings"))).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `PUT /settings`
    pub async fn update_settings(&self, settings: &Value) -> Result<Value> {
        let response = self
            .rest(self.http_client.put(self.url("/settings")))
            .json(settings)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Upload a local spreadsheet as multipart field `file`
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<UploadedFile> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClassifyError::Config(format!("not a file path: {}", path.display())))?
            .to_string();

        let data = tokio::fs::read(path).await?;
        tracing::info!(%filename, bytes = data.len(), "Uploading file");

        let part = Part::bytes(data)
            .file_name(filename)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let response = self
            .rest(self.http_client.post(self.url("/upload")))
            .multipart(form)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `POST /classify`: run a job without progress and wait for the summary
    pub async fn classify(&self, request: &ClassificationRequest) -> Result<Value> {
        let response = self
            .http_client
            .post(self.url("/classify"))
            .json(request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `GET /history`, newest first
    pub async fn list_history(&self, skip: u32, limit: u32) -> Result<Vec<Value>> {
        let response = self
            .rest(self.http_client.get(self.url("/history")))
            .query(&[("skip", skip), ("limit", limit)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `GET /history/{id}`
    pub async fn get_history(&self, history_id: impl Display) -> Result<Value> {
        let response = self
            .rest(self.http_client.get(self.url(&format!("/history/{}", history_id))))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Download the result workbook of a finished job into `dir`
    ///
    /// The file is written as `classified_result_{id}.xlsx` and streamed to
    /// disk chunk by chunk. A partially written file is removed on failure.
    pub async fn download_result(&self, history_id: impl Display, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let target = Self::result_path(&history_id, dir);

        let response = self
            .http_client
            .get(self.url(&format!("/classify/{}/download", history_id)))
            .send()
            .await?;
        let response = Self::check(response).await?;

        match Self::write_body(response, &target).await {
            Ok(bytes) => {
                tracing::info!(path = %target.display(), bytes, "Result downloaded");
                Ok(target)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&target).await;
                Err(e)
            }
        }
    }

    /// Where [`download_result`](Self::download_result) writes the workbook
    pub fn result_path(history_id: impl Display, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref()
            .join(format!("classified_result_{}.xlsx", history_id))
    }

    async fn write_body(response: Response, target: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(target).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[async_trait]
impl StreamTransport for ApiClient {
    async fn open_stream(&self, path: &str, body: &Value) -> Result<ByteStream> {
        let response = self
            .http_client
            .post(self.url(path))
            .header(ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;

        let response = Self::check(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClassifyError::from));
        Ok(Box::pin(stream))
    }
}
