//! Builds object store clients for scan targets.

use crate::models::scan::{ObjectLocation, StoreCredentials};
use object_store::{ObjectStore, aws::AmazonS3Builder};
use std::sync::Arc;

/// Hands out a store client able to read a given location.
pub trait StoreConnector: Send + Sync {
    fn connect(
        &self,
        location: &ObjectLocation,
        credentials: Option<&StoreCredentials>,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error>;
}

/// S3 (or S3-compatible) connector.
///
/// Without explicit credentials the ambient AWS environment is used
/// (`AWS_ACCESS_KEY_ID`, instance profile, ...).
#[derive(Debug, Clone)]
pub struct S3Connector {
    default_region: String,
    endpoint: Option<String>,
}

impl S3Connector {
    pub fn new(default_region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            default_region: default_region.into(),
            endpoint,
        }
    }
}

impl StoreConnector for S3Connector {
    fn connect(
        &self,
        location: &ObjectLocation,
        credentials: Option<&StoreCredentials>,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        let region = location
            .region
            .as_deref()
            .unwrap_or(self.default_region.as_str());

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&location.bucket)
            .with_region(region);

        if let Some(creds) = credentials {
            builder = builder
                .with_access_key_id(&creds.access_key_id)
                .with_secret_access_key(&creds.secret_access_key);
        }

        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        Ok(Arc::new(builder.build()?))
    }
}

/// Connector that always returns the same store, whatever the location.
#[cfg(test)]
pub struct FixedStoreConnector(pub Arc<dyn ObjectStore>);

#[cfg(test)]
impl StoreConnector for FixedStoreConnector {
    fn connect(
        &self,
        _location: &ObjectLocation,
        _credentials: Option<&StoreCredentials>,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        Ok(self.0.clone())
    }
}
