//! Scan requests: what to scan, how, and with which options and tags.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Identifies one remote object. Immutable once a request is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    /// Bucket (namespace) holding the object.
    pub bucket: String,

    /// Object key, e.g. `uploads/2025/invoice.pdf`.
    pub key: String,

    /// Region hint for the store; the connector default applies when unset.
    pub region: Option<String>,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, region: Option<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            region: region.filter(|r| !r.trim().is_empty()),
        }
    }

    /// `s3://bucket/key` form used in logs and as the provider identifier.
    pub fn identifier(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Static credentials for the remote store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl StoreCredentials {
    /// Credentials from an optional key pair; both halves or neither.
    pub fn from_pair(
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> Result<Option<Self>, RequestError> {
        let clean = |v: Option<String>| v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        match (clean(access_key_id), clean(secret_access_key)) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Some(Self {
                access_key_id,
                secret_access_key,
            })),
            (None, None) => Ok(None),
            _ => Err(RequestError::IncompleteCredentials),
        }
    }
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// How content reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMethod {
    /// The whole content is handed over in one piece.
    #[default]
    Buffer,
    /// The backend pulls byte ranges through a content provider.
    #[serde(alias = "stream")]
    Streaming,
}

impl ScanMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMethod::Buffer => "buffer",
            ScanMethod::Streaming => "streaming",
        }
    }
}

impl FromStr for ScanMethod {
    type Err = RequestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "buffer" => Ok(ScanMethod::Buffer),
            "streaming" | "stream" => Ok(ScanMethod::Streaming),
            other => Err(RequestError::UnknownScanMethod(other.to_string())),
        }
    }
}

/// Independent per-request toggles. Enabling one never implies another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    pub digest_enabled: bool,
    pub predictive_ml_enabled: bool,
    pub feedback_enabled: bool,
    pub verbose_enabled: bool,
    pub active_content_enabled: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            digest_enabled: true,
            predictive_ml_enabled: false,
            feedback_enabled: false,
            verbose_enabled: false,
            active_content_enabled: false,
        }
    }
}

/// Where the content of a scan comes from.
#[derive(Debug, Clone)]
pub enum ScanSource {
    /// An object in the remote store, read through a ranged provider.
    Object {
        location: ObjectLocation,
        credentials: Option<StoreCredentials>,
    },
    /// Bytes the caller already holds.
    Inline { filename: String, data: Bytes },
}

impl ScanSource {
    /// Tag value describing the content origin.
    pub fn origin(&self) -> &'static str {
        match self {
            ScanSource::Object { .. } => "object_store",
            ScanSource::Inline { .. } => "upload",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub source: ScanSource,
    pub method: ScanMethod,
    pub options: ScanOptions,
    /// Caller tags, `key=value`, order and duplicates preserved.
    pub tags: Vec<String>,
}

impl ScanRequest {
    /// Name the scan identifier and file-type tag are derived from.
    pub fn display_name(&self) -> &str {
        match &self.source {
            ScanSource::Object { location, .. } => &location.key,
            ScanSource::Inline { filename, .. } => filename,
        }
    }

    /// Reject malformed requests before any backend is involved.
    pub fn validate(&self) -> Result<(), RequestError> {
        match &self.source {
            ScanSource::Object { location, .. } => {
                if location.bucket.trim().is_empty() {
                    return Err(RequestError::MissingBucket);
                }
                if location.key.trim().is_empty() || location.key.ends_with('/') {
                    return Err(RequestError::MissingKey);
                }
            }
            ScanSource::Inline { data, .. } => {
                if data.is_empty() {
                    return Err(RequestError::EmptyContent);
                }
            }
        }

        self.tags.iter().try_for_each(|tag| validate_tag(tag))
    }
}

/// A tag must look like `key=value` with a non-empty key.
pub fn validate_tag(tag: &str) -> Result<(), RequestError> {
    match tag.split_once('=') {
        Some((key, _)) if !key.trim().is_empty() => Ok(()),
        _ => Err(RequestError::MalformedTag(tag.to_string())),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request body is empty; nothing to scan")]
    EmptyContent,
    #[error("bucket must not be empty")]
    MissingBucket,
    #[error("object key must name an object")]
    MissingKey,
    #[error("unknown scan method `{0}` (expected `buffer` or `streaming`)")]
    UnknownScanMethod(String),
    #[error("tag `{0}` is not of the form key=value")]
    MalformedTag(String),
    #[error("access key and secret key must be given together")]
    IncompleteCredentials,
}
