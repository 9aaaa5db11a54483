//! Turns backend payloads into a [`CanonicalVerdict`].
//!
//! Two payload shapes are understood and both are always checked:
//!
//! - nested: `result.atse.malwareCount` > 0 marks the content unsafe; names
//!   come from `result.atse.malware[].name`;
//! - flat: a non-empty `foundMalwares` list marks it unsafe; names come from
//!   `foundMalwares[].malwareName`.
//!
//! Names from every shape that fired are merged.
//!
//! **Fail-open:** a payload that is not JSON, or matches neither shape, is
//! reported as safe with no names. A backend answering in an unknown format is
//! therefore indistinguishable from a clean scan. The raw payload is always
//! kept on the verdict so such cases can be audited.

use crate::models::verdict::{CanonicalVerdict, RawVerdictPayload};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub fn normalize(raw: RawVerdictPayload) -> CanonicalVerdict {
    let mut safe = true;
    let mut names = BTreeSet::new();

    match serde_json::from_str::<Value>(&raw.body) {
        Ok(doc) => {
            log_audit_fields(&raw.scan_id, &doc);

            if let Some(found) = nested_detections(&doc) {
                safe = false;
                names.extend(found);
            }
            if let Some(found) = flat_detections(&doc) {
                safe = false;
                names.extend(found);
            }
        }
        Err(err) => {
            warn!(
                scan_id = %raw.scan_id,
                error = %err,
                "verdict payload is not JSON; reporting as safe"
            );
        }
    }

    if !safe {
        warn!(scan_id = %raw.scan_id, malware = ?names, "malware detected");
    }
    CanonicalVerdict::new(safe, names, raw)
}

fn nested_detections(doc: &Value) -> Option<Vec<String>> {
    let atse = doc.get("result")?.get("atse")?;
    let count = atse.get("malwareCount")?.as_f64()?;
    if count <= 0.0 {
        return None;
    }

    Some(names_from(atse.get("malware"), "name"))
}

fn flat_detections(doc: &Value) -> Option<Vec<String>> {
    let found = doc.get("foundMalwares")?.as_array()?;
    if found.is_empty() {
        return None;
    }

    Some(names_from(doc.get("foundMalwares"), "malwareName"))
}

fn names_from(list: Option<&Value>, field: &str) -> Vec<String> {
    list.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field)?.as_str())
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn log_audit_fields(scan_id: &str, doc: &Value) {
    for field in ["fileSha1", "fileSha256"] {
        if let Some(digest) = doc.get(field).and_then(Value::as_str).filter(|d| !d.is_empty()) {
            debug!(scan_id, field, digest, "file digest");
        }
    }
    if let Some(code) = doc.get("scanResult").and_then(Value::as_i64) {
        debug!(scan_id, code, "engine scan result code");
    }
}
