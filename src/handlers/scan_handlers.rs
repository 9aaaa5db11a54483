//! HTTP handlers for scan submission.
//!
//! - POST /scan     -> scan the request body; options travel in `X-*` headers
//! - POST /s3/scan  -> scan an object in S3 (or an S3-compatible store)

use crate::{
    errors::AppError,
    models::scan::{
        ObjectLocation, ScanMethod, ScanOptions, ScanRequest, ScanSource, StoreCredentials,
    },
    services::scan_service::ScanOutcome,
    state::AppState,
};
use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};

/// Result of one scan as reported to the caller.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub safe: bool,
    /// Raw backend payload, kept for audit.
    pub message: String,
    pub scan_id: String,
    pub tags: Vec<String>,
    pub malware_names: Vec<String>,
    pub generation: u64,
}

impl From<ScanOutcome> for ScanResponse {
    fn from(outcome: ScanOutcome) -> Self {
        let verdict = outcome.verdict;
        Self {
            safe: verdict.is_safe(),
            message: verdict.raw_payload().to_string(),
            scan_id: verdict.scan_id().to_string(),
            malware_names: verdict.malware_names().iter().cloned().collect(),
            tags: outcome.tags,
            generation: outcome.generation,
        }
    }
}

/// Body of `POST /s3/scan`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectScanRequest {
    pub bucket: String,
    pub key: String,
    pub region: Option<String>,
    pub aws_access_key: Option<String>,
    pub aws_secret_key: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub scan_method: Option<String>,
    #[serde(default)]
    pub options: ScanOptions,
}

/// `POST /scan`
pub async fn scan_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ScanResponse>, AppError> {
    let filename = header_str(&headers, "x-filename")
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown")
        .to_string();
    let method: ScanMethod = header_str(&headers, "x-scan-method").unwrap_or("").parse()?;

    let options = ScanOptions {
        digest_enabled: !header_is(&headers, "x-digest-enabled", "false"),
        predictive_ml_enabled: header_is(&headers, "x-pml-enabled", "true"),
        feedback_enabled: header_is(&headers, "x-spn-feedback-enabled", "true"),
        verbose_enabled: header_is(&headers, "x-verbose-enabled", "true"),
        active_content_enabled: header_is(&headers, "x-active-content-enabled", "true"),
    };

    let tags = header_str(&headers, "x-scan-tags")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let request = ScanRequest {
        source: ScanSource::Inline {
            filename,
            data: body,
        },
        method,
        options,
        tags,
    };

    let outcome = state.scans.scan(request).await?;
    Ok(Json(outcome.into()))
}

/// `POST /s3/scan`
pub async fn scan_object(
    State(state): State<AppState>,
    Json(body): Json<ObjectScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    let method: ScanMethod = body.scan_method.as_deref().unwrap_or("").parse()?;
    let credentials = StoreCredentials::from_pair(body.aws_access_key, body.aws_secret_key)?;

    let request = ScanRequest {
        source: ScanSource::Object {
            location: ObjectLocation::new(body.bucket, body.key, body.region),
            credentials,
        },
        method,
        options: body.options,
        tags: body.tags,
    };

    let outcome = state.scans.scan(request).await?;
    Ok(Json(outcome.into()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

fn header_is(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    header_str(headers, name).is_some_and(|v| v.eq_ignore_ascii_case(expected))
}
