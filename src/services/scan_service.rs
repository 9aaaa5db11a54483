//! Drives one scan from request to canonical verdict.

use crate::{
    models::{
        scan::{RequestError, ScanMethod, ScanRequest, ScanSource},
        verdict::CanonicalVerdict,
    },
    services::{
        backend::{
            BackendError, BackendSession,
            protocol::{ScanContext, ScanToggles},
        },
        content_provider::{
            BytesProvider, ContentProvider, ObjectStoreProvider, ProviderError, read_all,
        },
        normalizer::normalize,
        selector::BackendSelector,
        store_connector::StoreConnector,
    },
};
use chrono::{DateTime, Utc};
use std::{path::Path, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),
    #[error("no backend session is active")]
    NoActiveBackend,
    #[error("object store client could not be built: {0}")]
    Store(#[source] object_store::Error),
    #[error(transparent)]
    Content(#[from] ProviderError),
    #[error("scan `{scan_id}` failed: {source}")]
    Backend {
        scan_id: String,
        #[source]
        source: BackendError,
    },
}

/// Verdict plus everything the caller reports alongside it.
#[derive(Debug)]
pub struct ScanOutcome {
    pub verdict: CanonicalVerdict,
    /// Tags sent to the backend, then one `malware_name=` tag per detection.
    pub tags: Vec<String>,
    /// Generation of the session that produced the verdict.
    pub generation: u64,
}

#[derive(Clone)]
pub struct ScanService {
    selector: BackendSelector,
    stores: Arc<dyn StoreConnector>,
    custom_tags: Arc<[String]>,
}

impl ScanService {
    pub fn new(
        selector: BackendSelector,
        stores: Arc<dyn StoreConnector>,
        custom_tags: Vec<String>,
    ) -> Self {
        Self {
            selector,
            stores,
            custom_tags: custom_tags.into(),
        }
    }

    /// Validate `request`, then scan against whichever session is active
    /// right now.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanOutcome, ScanError> {
        request.validate()?;
        let session = self
            .selector
            .current()
            .await
            .ok_or(ScanError::NoActiveBackend)?;

        let outcome = self.scan_with_session(request, &session).await?;
        if !self.selector.is_current(&session).await {
            warn!(
                scan_id = %outcome.verdict.scan_id(),
                generation = session.generation(),
                "scan completed against a replaced backend session"
            );
        }
        Ok(outcome)
    }

    /// Scan against an explicit session. No retry is attempted on failure.
    /// `request` must already have passed `validate`.
    async fn scan_with_session(
        &self,
        request: ScanRequest,
        session: &BackendSession,
    ) -> Result<ScanOutcome, ScanError> {
        let scan_id = scan_identifier(Utc::now(), request.display_name());
        let ctx = ScanContext {
            identifier: scan_id.clone(),
            tags: self.backend_tags(&request),
            toggles: ScanToggles::from(&request.options),
        };
        info!(
            scan_id = %scan_id,
            generation = session.generation(),
            method = request.method.as_str(),
            tags = ?ctx.tags,
            "starting scan"
        );

        let provider: Box<dyn ContentProvider> = match request.source {
            ScanSource::Object {
                location,
                credentials,
            } => {
                let store = self
                    .stores
                    .connect(&location, credentials.as_ref())
                    .map_err(ScanError::Store)?;
                Box::new(ObjectStoreProvider::open(store, &location).await?)
            }
            ScanSource::Inline { filename, data } => Box::new(BytesProvider::new(filename, data)),
        };
        debug!(
            scan_id = %scan_id,
            identifier = provider.identifier(),
            size = provider.size(),
            "content resolved"
        );

        let result = match request.method {
            ScanMethod::Buffer => {
                let data = read_all(provider.as_ref()).await?;
                session.scan_buffer(data, &ctx).await
            }
            ScanMethod::Streaming => session.scan_stream(provider.as_ref(), &ctx).await,
        };
        let raw = result.map_err(|source| ScanError::Backend {
            scan_id: scan_id.clone(),
            source,
        })?;

        let verdict = normalize(raw);
        let mut tags = ctx.tags;
        tags.extend(
            verdict
                .malware_names()
                .iter()
                .map(|name| format!("malware_name={}", name)),
        );
        info!(
            scan_id = %scan_id,
            safe = verdict.is_safe(),
            "scan finished"
        );

        Ok(ScanOutcome {
            verdict,
            tags,
            generation: session.generation(),
        })
    }

    /// Machine tags, then configured custom tags, then the caller's tags.
    fn backend_tags(&self, request: &ScanRequest) -> Vec<String> {
        let options = &request.options;
        let mut tags = vec![
            format!("file_type={}", extension(request.display_name())),
            format!("scan_method={}", request.method.as_str()),
            format!("source={}", request.source.origin()),
            format!("digest={}", options.digest_enabled),
            format!("ml_enabled={}", options.predictive_ml_enabled),
            format!("spn_feedback={}", options.feedback_enabled),
            format!("verbose={}", options.verbose_enabled),
            format!("active_content={}", options.active_content_enabled),
        ];
        tags.extend(self.custom_tags.iter().cloned());
        tags.extend(request.tags.iter().cloned());
        tags
    }
}

/// `YYYYMMDDhhmmss-<basename>`.
pub fn scan_identifier(now: DateTime<Utc>, name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), base)
}

/// Extension including the dot, or empty.
fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}
