//! Shared state handed to every handler.

use crate::services::{
    reconfig_service::ReconfigService, scan_service::ScanService, selector::BackendSelector,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub scans: ScanService,
    pub reconfig: ReconfigService,
    pub selector: BackendSelector,
    /// Operator tags added to every scan, reported by the health endpoint.
    pub custom_tags: Arc<[String]>,
}
