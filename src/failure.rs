//! Failure records reported by the download pipeline.
//!
//! A `Failure` only carries the diagnostic fields that make sense for its
//! kind; everything else stays `None` and is skipped when serialised.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    #[error("update data is incomplete")]
    NullInput,
    #[error("download URL has an invalid scheme")]
    InvalidUrlScheme,
    #[error("server returned an unsuccessful response")]
    UnsuccessfulResponse,
    #[error("server error")]
    ServerError,
    #[error("connection error")]
    ConnectionError,
    #[error("unknown error")]
    Unknown,
    #[error("could not move temporary file")]
    CouldNotMoveTempFile,
    #[error("checksum verification failed")]
    VerificationFailed,
}

impl FailureKind {
    /// Stable code used by notifications.
    pub fn reason_code(self) -> u8 {
        match self {
            FailureKind::NullInput => 1,
            FailureKind::InvalidUrlScheme => 2,
            FailureKind::UnsuccessfulResponse => 3,
            FailureKind::ServerError => 4,
            FailureKind::ConnectionError => 5,
            FailureKind::Unknown => 6,
            FailureKind::CouldNotMoveTempFile => 7,
            FailureKind::VerificationFailed => 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ota_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            url: None,
            filename: None,
            version: None,
            ota_version: None,
            http_code: None,
            http_message: None,
            detail: None,
        }
    }

    pub fn null_input(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::NullInput).with_detail(detail)
    }

    pub fn invalid_url_scheme(url: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidUrlScheme).with_url(url)
    }

    pub fn unsuccessful_response(url: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        let mut failure = Self::new(FailureKind::UnsuccessfulResponse).with_url(url);
        failure.http_code = Some(code);
        failure.http_message = Some(message.into());
        failure
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_versions(mut self, version: Option<String>, ota_version: Option<String>) -> Self {
        self.version = version;
        self.ota_version = ota_version;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn reason_code(&self) -> u8 {
        self.kind.reason_code()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Failure {}
