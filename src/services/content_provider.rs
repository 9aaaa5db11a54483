//! Pull-based ranged access to scan content.
//!
//! A scanning engine drives the reads: it asks for arbitrary `(offset, length)`
//! windows, in any order, possibly overlapping or repeated, possibly from
//! several tasks at once. The provider answers each call with exactly one
//! ranged fetch and never reads ahead, so memory use is bounded by the ranges
//! currently in flight rather than by the object size.
//!
//! The object size is resolved once when the provider is opened and cached for
//! its lifetime. A concurrent overwrite of the remote object is not detected;
//! reads simply return whatever the store serves for the requested window.

use crate::models::scan::ObjectLocation;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{GetOptions, GetRange, ObjectStore, path::Path};
use std::{error::Error as StdError, sync::Arc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("size of `{identifier}` is unavailable: {source}")]
    SizeUnavailable {
        identifier: String,
        #[source]
        source: object_store::Error,
    },
    #[error("reading {length} bytes at offset {offset} of `{identifier}` failed: {source}")]
    RangeRead {
        identifier: String,
        offset: u64,
        length: u64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ProviderError {
    /// True when the store reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::SizeUnavailable {
                source: object_store::Error::NotFound { .. },
                ..
            }
        )
    }
}

/// Random access to the bytes of one piece of content.
///
/// Implementations hold no cursor: every call is independent and they must be
/// safe to call from several tasks concurrently.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Stable name of the content, e.g. `s3://bucket/key`.
    fn identifier(&self) -> &str;

    /// Total size in bytes, fixed for the provider's lifetime.
    fn size(&self) -> u64;

    /// Read `length` bytes starting at `offset`.
    ///
    /// A window running past the end yields the truncated remainder.
    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes, ProviderError>;
}

/// Provider over an object in an [`ObjectStore`].
pub struct ObjectStoreProvider {
    store: Arc<dyn ObjectStore>,
    path: Path,
    identifier: String,
    size: u64,
}

impl ObjectStoreProvider {
    /// Bind to `location`, resolving its size with a single metadata call.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        location: &ObjectLocation,
    ) -> Result<Self, ProviderError> {
        let identifier = location.identifier();
        let path = Path::from(location.key.as_str());

        let head = store
            .get_opts(
                &path,
                GetOptions {
                    head: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|source| ProviderError::SizeUnavailable {
                identifier: identifier.clone(),
                source,
            })?;

        let size = head.meta.size;
        debug!(identifier = %identifier, size, "resolved object size");

        Ok(Self {
            store,
            path,
            identifier,
            size,
        })
    }

    fn range_error(
        &self,
        offset: u64,
        length: u64,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> ProviderError {
        ProviderError::RangeRead {
            identifier: self.identifier.clone(),
            offset,
            length,
            source: source.into(),
        }
    }
}

#[async_trait]
impl ContentProvider for ObjectStoreProvider {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes, ProviderError> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        // Not clamped to the cached size: the store's own bounds handling is
        // authoritative for windows that run past the end.
        let options = GetOptions {
            range: Some(GetRange::Bounded(offset..offset.saturating_add(length))),
            ..Default::default()
        };

        let result = self
            .store
            .get_opts(&self.path, options)
            .await
            .map_err(|err| self.range_error(offset, length, err))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|err| self.range_error(offset, length, err))?;

        debug!(
            identifier = %self.identifier,
            offset,
            length,
            returned = bytes.len(),
            "served range"
        );
        Ok(bytes)
    }
}

/// Provider over content that is already in memory.
pub struct BytesProvider {
    identifier: String,
    data: Bytes,
}

impl BytesProvider {
    pub fn new(identifier: impl Into<String>, data: Bytes) -> Self {
        Self {
            identifier: identifier.into(),
            data,
        }
    }
}

#[async_trait]
impl ContentProvider for BytesProvider {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes, ProviderError> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let size = self.size();
        if offset >= size {
            return Err(ProviderError::RangeRead {
                identifier: self.identifier.clone(),
                offset,
                length,
                source: format!("range starts beyond end of content ({} bytes)", size).into(),
            });
        }

        let end = offset.saturating_add(length).min(size);
        Ok(self.data.slice(offset as usize..end as usize))
    }
}

/// Fetch the whole content with one range read.
pub async fn read_all(provider: &dyn ContentProvider) -> Result<Bytes, ProviderError> {
    match provider.size() {
        0 => Ok(Bytes::new()),
        size => provider.read_range(0, size).await,
    }
}
