pub mod backend;
pub mod content_provider;
pub mod normalizer;
pub mod reconfig_service;
pub mod scan_service;
pub mod selector;
pub mod store_connector;
