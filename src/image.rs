//! Image references attached to messages and their resolution to wire form.
//!
//! Local files and remote URLs both resolve to raw bytes, which are then
//! base64-encoded. The service receives the same representation regardless of
//! where an image came from.

use base64::prelude::*;
use reqwest::Url;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::client::ClientError;

/// Where an image attachment comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    LocalFile(PathBuf),
    RemoteUrl(Url),
}

impl ImageSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ImageSource::LocalFile(path.into())
    }

    /// Parse a remote image URL. Only `http` and `https` are accepted.
    pub fn url(url: &str) -> Result<Self, ClientError> {
        let parsed = Url::parse(url).map_err(|e| ClientError::ImageResolution {
            reference: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(ImageSource::RemoteUrl(parsed)),
            other => Err(ClientError::ImageResolution {
                reference: url.to_string(),
                reason: format!("unsupported URL scheme '{}'", other),
            }),
        }
    }

    /// Human-readable reference used in errors and logs.
    pub fn reference(&self) -> String {
        self.to_string()
    }

    /// Read or fetch the image bytes.
    pub async fn resolve_to_bytes(&self, http: &reqwest::Client) -> Result<Vec<u8>, ClientError> {
        let failure = |reason: String| ClientError::ImageResolution {
            reference: self.reference(),
            reason,
        };

        match self {
            ImageSource::LocalFile(path) => tokio::fs::read(path)
                .await
                .map_err(|e| failure(e.to_string())),
            ImageSource::RemoteUrl(url) => {
                let response = http
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| failure(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(failure(format!("HTTP {}", status)));
                }
                let bytes = response.bytes().await.map_err(|e| failure(e.to_string()))?;
                Ok(bytes.to_vec())
            }
        }
    }

    /// Resolve to the base64 string placed in a message's `images` array.
    pub async fn resolve_to_base64(&self, http: &reqwest::Client) -> Result<String, ClientError> {
        let bytes = self.resolve_to_bytes(http).await?;
        debug!(image = %self, bytes = bytes.len(), "Resolved image attachment");
        Ok(BASE64_STANDARD.encode(bytes))
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::LocalFile(path) => write!(f, "{}", path.display()),
            ImageSource::RemoteUrl(url) => write!(f, "{}", url),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::LocalFile(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::LocalFile(path.to_path_buf())
    }
}

impl From<Url> for ImageSource {
    fn from(url: Url) -> Self {
        ImageSource::RemoteUrl(url)
    }
}

/// Resolve every source in order. The first failure aborts the whole batch.
pub async fn encode_all(
    http: &reqwest::Client,
    sources: &[ImageSource],
) -> Result<Vec<String>, ClientError> {
    let mut encoded = Vec::with_capacity(sources.len());
    for source in sources {
        encoded.push(source.resolve_to_base64(http).await?);
    }
    Ok(encoded)
}
