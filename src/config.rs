use crate::{
    models::{backend_config::BackendConfig, scan::validate_tag},
    services::backend::BackendOptions,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Initial backend; credentials are redacted from its `Debug` output.
    pub backend: BackendConfig,
    pub custom_tags: Vec<String>,
    pub probe_timeout: Duration,
    pub backend_options: BackendOptions,
    pub max_upload_bytes: usize,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Malware scanning bridge for remote object storage")]
pub struct Args {
    /// Host to bind to (overrides SCAN_BRIDGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SCAN_BRIDGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Hosted scanning API key (overrides SCAN_BRIDGE_CLOUD_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Hosted scanning API region (overrides SCAN_BRIDGE_CLOUD_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Explicit hosted API endpoint (overrides SCAN_BRIDGE_CLOUD_ENDPOINT)
    #[arg(long)]
    pub cloud_endpoint: Option<String>,

    /// On-premise engine `host:port`; takes precedence over the hosted API
    /// (overrides SCAN_BRIDGE_EXTERNAL_ADDR)
    #[arg(long)]
    pub external_addr: Option<String>,

    /// Use TLS to the on-premise engine (overrides SCAN_BRIDGE_EXTERNAL_TLS)
    #[arg(long)]
    pub use_tls: bool,

    /// Comma separated `key=value` tags added to every scan
    /// (overrides SCAN_BRIDGE_CUSTOM_TAGS)
    #[arg(long)]
    pub custom_tags: Option<String>,

    /// Probe time budget in seconds (overrides SCAN_BRIDGE_PROBE_TIMEOUT_SECS)
    #[arg(long)]
    pub probe_timeout_secs: Option<u64>,

    /// Per-request backend timeout in seconds (overrides SCAN_BRIDGE_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Largest range an engine may pull at once (overrides SCAN_BRIDGE_MAX_RANGE_BYTES)
    #[arg(long)]
    pub max_range_bytes: Option<u64>,

    /// Largest accepted inline upload (overrides SCAN_BRIDGE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Default region of the object store (overrides SCAN_BRIDGE_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// S3-compatible endpoint, e.g. MinIO (overrides SCAN_BRIDGE_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,
}

const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge `args` over the variables `lookup` yields; CLI wins.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // --- Environment fallback ---
        let env_host = var("SCAN_BRIDGE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var::<u16>(&lookup, "SCAN_BRIDGE_PORT")?.unwrap_or(3001);
        let env_tls = var("SCAN_BRIDGE_EXTERNAL_TLS").is_some_and(|v| v.trim() == "true");
        let probe_secs = parse_var::<u64>(&lookup, "SCAN_BRIDGE_PROBE_TIMEOUT_SECS")?.unwrap_or(5);
        let request_secs =
            parse_var::<u64>(&lookup, "SCAN_BRIDGE_REQUEST_TIMEOUT_SECS")?.unwrap_or(300);
        let defaults = BackendOptions::default();
        let max_range = parse_var::<u64>(&lookup, "SCAN_BRIDGE_MAX_RANGE_BYTES")?
            .unwrap_or(defaults.max_range_bytes);
        let max_upload = parse_var::<usize>(&lookup, "SCAN_BRIDGE_MAX_UPLOAD_BYTES")?
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        // --- Merge ---
        let backend = BackendConfig::from_parts(
            args.api_key.or_else(|| var("SCAN_BRIDGE_CLOUD_API_KEY")),
            args.region.or_else(|| var("SCAN_BRIDGE_CLOUD_REGION")),
            args.cloud_endpoint.or_else(|| var("SCAN_BRIDGE_CLOUD_ENDPOINT")),
            args.external_addr.or_else(|| var("SCAN_BRIDGE_EXTERNAL_ADDR")),
            args.use_tls || env_tls,
        );

        let raw_tags = args
            .custom_tags
            .or_else(|| var("SCAN_BRIDGE_CUSTOM_TAGS"))
            .unwrap_or_default();
        let custom_tags = parse_custom_tags(&raw_tags)?;

        let probe_timeout = Duration::from_secs(args.probe_timeout_secs.unwrap_or(probe_secs));
        anyhow::ensure!(!probe_timeout.is_zero(), "probe timeout must be positive");
        let max_range_bytes = args.max_range_bytes.unwrap_or(max_range);
        anyhow::ensure!(max_range_bytes > 0, "max range bytes must be positive");

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend,
            custom_tags,
            probe_timeout,
            backend_options: BackendOptions {
                connect_timeout: probe_timeout,
                request_timeout: Duration::from_secs(
                    args.request_timeout_secs.unwrap_or(request_secs),
                ),
                max_range_bytes,
            },
            max_upload_bytes: args.max_upload_bytes.unwrap_or(max_upload),
            s3_region: args
                .s3_region
                .or_else(|| var("SCAN_BRIDGE_S3_REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            s3_endpoint: args.s3_endpoint.or_else(|| var("SCAN_BRIDGE_S3_ENDPOINT")),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}

/// Split a comma separated tag list; every entry must be `key=value`.
pub fn parse_custom_tags(raw: &str) -> Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(|tag| {
            validate_tag(tag)
                .map(|_| tag.to_string())
                .with_context(|| "invalid SCAN_BRIDGE_CUSTOM_TAGS entry")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backend_config::BackendMode;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_anything_set() {
        let cfg = AppConfig::from_sources(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3001");
        assert_eq!(cfg.backend.mode(), BackendMode::Cloud);
        assert_eq!(cfg.backend.cloud.region, "us-1");
        assert!(cfg.custom_tags.is_empty());
        assert_eq!(cfg.probe_timeout, Duration::from_secs(5));
        assert_eq!(cfg.backend_options.max_range_bytes, 8 * 1024 * 1024);
        assert_eq!(cfg.s3_region, "us-east-1");
        assert!(cfg.s3_endpoint.is_none());
    }

    #[test]
    fn cli_wins_over_environment() {
        let args = Args {
            port: Some(9000),
            external_addr: Some("engine.local:7443".into()),
            ..Default::default()
        };
        let env = env_of(&[
            ("SCAN_BRIDGE_PORT", "8000"),
            ("SCAN_BRIDGE_CLOUD_API_KEY", "key-from-env"),
            ("SCAN_BRIDGE_EXTERNAL_ADDR", "other.local:1"),
            ("SCAN_BRIDGE_EXTERNAL_TLS", "true"),
            ("SCAN_BRIDGE_CUSTOM_TAGS", "env=prod, team=sec"),
        ]);

        let cfg = AppConfig::from_sources(args, env).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.backend.external.address, "engine.local:7443");
        assert!(cfg.backend.external.use_tls);
        assert!(cfg.backend.is_ambiguous());
        assert_eq!(cfg.custom_tags, vec!["env=prod", "team=sec"]);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(
            AppConfig::from_sources(Args::default(), env_of(&[("SCAN_BRIDGE_PORT", "http")]))
                .is_err()
        );
        assert!(
            AppConfig::from_sources(
                Args::default(),
                env_of(&[("SCAN_BRIDGE_CUSTOM_TAGS", "env=prod,broken")])
            )
            .is_err()
        );
        let zero = Args {
            probe_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(AppConfig::from_sources(zero, env_of(&[])).is_err());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let env = env_of(&[("SCAN_BRIDGE_CLOUD_API_KEY", "super-secret-key")]);
        let cfg = AppConfig::from_sources(Args::default(), env).unwrap();
        assert!(!format!("{:?}", cfg).contains("super-secret-key"));
    }
}
