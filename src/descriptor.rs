//! Update descriptor as served by the update server.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::failure::{Failure, FailureKind};

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse descriptor: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescriptor {
    pub download_url: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub download_size: u64,
    #[serde(alias = "MD5sum", alias = "md5sum")]
    pub checksum: Option<String>,
    pub version_number: Option<String>,
    pub ota_version_number: Option<String>,
}

/// A descriptor whose URL and filename are known to be usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpdate {
    pub download_url: String,
    pub filename: String,
    pub download_size: u64,
    pub checksum: Option<String>,
    pub version_number: Option<String>,
    pub ota_version_number: Option<String>,
}

impl UpdateDescriptor {
    pub fn from_json_file(path: &Path) -> Result<Self, DescriptorError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn validate(&self) -> Result<ValidatedUpdate, Failure> {
        let url = match self.download_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => return Err(Failure::null_input("missing download URL")),
        };
        let filename = match self.filename.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Failure::null_input("missing filename")),
        };

        let scheme_ok = Url::parse(url)
            .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !scheme_ok {
            return Err(Failure::invalid_url_scheme(url));
        }

        Ok(ValidatedUpdate {
            download_url: url.to_string(),
            filename: filename.to_string(),
            download_size: self.download_size,
            checksum: self.checksum.clone().filter(|c| !c.trim().is_empty()),
            version_number: self.version_number.clone(),
            ota_version_number: self.ota_version_number.clone(),
        })
    }
}

impl ValidatedUpdate {
    /// Fills in the identifying fields that apply to the failure's kind.
    /// Kinds other than an unsuccessful response keep only kind and detail.
    pub fn annotate(&self, failure: Failure) -> Failure {
        match failure.kind {
            FailureKind::UnsuccessfulResponse => {
                let failure = if failure.url.is_none() {
                    failure.with_url(&self.download_url)
                } else {
                    failure
                };
                failure
                    .with_filename(&self.filename)
                    .with_versions(self.version_number.clone(), self.ota_version_number.clone())
            }
            FailureKind::InvalidUrlScheme if failure.url.is_none() => failure.with_url(&self.download_url),
            _ => failure,
        }
    }
}
