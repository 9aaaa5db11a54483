//! Backend selection settings: which scanning engine is active and how to reach it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Region used for the hosted API when none is configured.
pub const DEFAULT_CLOUD_REGION: &str = "us-1";

/// Which of the two scanning backends a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Hosted scanning API reached over HTTPS with an API key.
    Cloud,
    /// On-premise engine reached over the framed TCP protocol.
    External,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Cloud => f.write_str("cloud"),
            BackendMode::External => f.write_str("external"),
        }
    }
}

/// Hosted API settings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CloudSettings {
    /// API key sent with every request. Required in cloud mode.
    pub api_key: String,

    /// Service region, used to derive the default endpoint.
    pub region: String,

    /// Explicit base URL, overriding the region-derived one.
    pub endpoint: Option<String>,
}

impl CloudSettings {
    /// Base URL of the hosted API without a trailing slash.
    pub fn endpoint_url(&self) -> String {
        match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => endpoint.trim_end_matches('/').to_string(),
            _ => format!(
                "https://antimalware.{}.cloudone.trendmicro.com",
                self.region
            ),
        }
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// The API key never ends up in logs.
impl fmt::Debug for CloudSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudSettings")
            .field(
                "api_key",
                &if self.has_credential() {
                    "<redacted>"
                } else {
                    "<unset>"
                },
            )
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// On-premise engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalSettings {
    /// `host:port` of the engine. Empty means "not configured".
    pub address: String,

    /// Wrap the TCP connection in TLS.
    pub use_tls: bool,
}

impl ExternalSettings {
    pub fn is_configured(&self) -> bool {
        !self.address.trim().is_empty()
    }
}

/// Complete backend configuration.
///
/// Both branches may be filled in; [`BackendConfig::mode`] decides which one is
/// live. A configured external address always wins over cloud credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
    pub cloud: CloudSettings,
    pub external: ExternalSettings,
}

impl BackendConfig {
    /// Build a configuration from loose fields, trimming whitespace and
    /// filling in the default region.
    pub fn from_parts(
        api_key: Option<String>,
        region: Option<String>,
        cloud_endpoint: Option<String>,
        external_address: Option<String>,
        use_tls: bool,
    ) -> Self {
        let clean = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            cloud: CloudSettings {
                api_key: clean(api_key).unwrap_or_default(),
                region: clean(region).unwrap_or_else(|| DEFAULT_CLOUD_REGION.to_string()),
                endpoint: clean(cloud_endpoint),
            },
            external: ExternalSettings {
                address: clean(external_address).unwrap_or_default(),
                use_tls,
            },
        }
    }

    pub fn mode(&self) -> BackendMode {
        if self.external.is_configured() {
            BackendMode::External
        } else {
            BackendMode::Cloud
        }
    }

    /// True when cloud credentials are present but ignored because an
    /// external address takes precedence.
    pub fn is_ambiguous(&self) -> bool {
        self.mode() == BackendMode::External && self.cloud.has_credential()
    }

    /// Human-readable endpoint of the selected backend.
    pub fn descriptor(&self) -> String {
        match self.mode() {
            BackendMode::External => {
                let scheme = if self.external.use_tls { "tls" } else { "tcp" };
                format!("{}://{}", scheme, self.external.address)
            }
            BackendMode::Cloud => self.cloud.endpoint_url(),
        }
    }
}
