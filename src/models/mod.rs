//! Core data models for the scanning bridge.
//!
//! These types describe what gets scanned, which backend does the scanning and
//! what comes back. They carry no I/O of their own; services act on them.

pub mod backend_config;
pub mod scan;
pub mod verdict;
