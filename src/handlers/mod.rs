pub mod config_handlers;
pub mod health_handlers;
pub mod scan_handlers;
