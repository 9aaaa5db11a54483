//! Scan verdicts, raw and normalized.

use std::collections::BTreeSet;

/// Backend response as received, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVerdictPayload {
    /// Correlation id of the scan that produced this payload.
    pub scan_id: String,

    /// Payload text; usually JSON but not guaranteed to be.
    pub body: String,
}

impl RawVerdictPayload {
    pub fn new(scan_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            scan_id: scan_id.into(),
            body: body.into(),
        }
    }
}

/// Normalized verdict. Only the result normalizer builds these.
///
/// `malware_names` is non-empty only when `safe` is false. A payload the
/// normalizer cannot interpret yields `safe == true`; see
/// [`crate::services::normalizer`] for that trade-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalVerdict {
    safe: bool,
    malware_names: BTreeSet<String>,
    scan_id: String,
    raw_payload: String,
}

impl CanonicalVerdict {
    pub(crate) fn new(safe: bool, malware_names: BTreeSet<String>, raw: RawVerdictPayload) -> Self {
        debug_assert!(!safe || malware_names.is_empty());
        Self {
            safe,
            malware_names,
            scan_id: raw.scan_id,
            raw_payload: raw.body,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn malware_names(&self) -> &BTreeSet<String> {
        &self.malware_names
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Untouched backend payload, kept for audit.
    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }
}
