//! Download endpoint abstraction and its reqwest implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Client};
use std::io;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransferError>> + Send>>;

/// Errors raised while opening or reading a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            TransferError::Network(err.to_string())
        } else {
            TransferError::Other(err.to_string())
        }
    }
}

pub struct SourceResponse {
    pub status: u16,
    pub message: String,
    /// Length of this response body, not of the whole file.
    pub content_length: Option<u64>,
    pub body: Option<ByteStream>,
}

impl SourceResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait DownloadSource: Send + Sync {
    /// Opens `url`, asking for `bytes=<offset>-` when `resume_from` is set.
    async fn open(&self, url: &str, resume_from: Option<u64>) -> Result<SourceResponse, TransferError>;
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

#[async_trait]
impl DownloadSource for HttpSource {
    async fn open(&self, url: &str, resume_from: Option<u64>) -> Result<SourceResponse, TransferError> {
        let mut request = self.client.get(url);
        if let Some(offset) = resume_from {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();
        let content_length = response.content_length();
        let message = status.canonical_reason().unwrap_or_default().to_string();

        let body: ByteStream = Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(TransferError::from)));

        Ok(SourceResponse {
            status: status.as_u16(),
            message,
            content_length,
            body: Some(body),
        })
    }
}
