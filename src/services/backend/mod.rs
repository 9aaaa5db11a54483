//! Scanning backends and the session handle wrapping whichever one is live.
//!
//! A [`BackendSession`] is built from a [`BackendConfig`] snapshot and moves
//! through `Uninitialized -> Active -> Draining -> Closed`. Sessions are never
//! mutated in place; reconfiguration builds a new one.

pub mod cloud;
pub mod external;
pub mod protocol;

#[cfg(test)]
pub(crate) mod fake_engine;

use crate::{
    models::{
        backend_config::{BackendConfig, BackendMode},
        verdict::RawVerdictPayload,
    },
    services::content_provider::{BytesProvider, ContentProvider, ProviderError},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cloud::CloudClient;
use external::ExternalClient;
use protocol::ScanContext;
use serde::Serialize;
use std::{
    fmt, io,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Failure to build a session from a configuration.
#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("cloud mode requires an API key")]
    MissingCredential,
    #[error("malformed scanner address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("building HTTP client failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure of a call against a live backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("could not resolve `{address}`: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("connecting to `{address}` failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("TLS handshake with `{address}` failed: {source}")]
    TlsHandshake {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("hosted API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hosted API rejected the credential (HTTP {0})")]
    Unauthorized(u16),
    #[error("hosted API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("scan engine closed the connection")]
    ConnectionClosed,
    #[error("no response from scan engine within {0:?}")]
    Timeout(Duration),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("scan engine reported an error: {0}")]
    Engine(String),
    #[error(transparent)]
    Content(#[from] ProviderError),
}

/// Transport limits shared by every session.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Largest window an engine may pull in one command.
    pub max_range_bytes: u64,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
            max_range_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Active,
    Draining,
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Uninitialized,
            1 => SessionState::Active,
            2 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }
}

/// The two backend shapes.
pub enum BackendKind {
    Cloud(CloudClient),
    External(ExternalClient),
}

/// Live handle to one scanning backend.
pub struct BackendSession {
    id: Uuid,
    generation: u64,
    kind: BackendKind,
    state: AtomicU8,
    created_at: DateTime<Utc>,
}

impl BackendSession {
    /// Build a session for `config`. No network round-trip happens here; an
    /// unreachable engine is only noticed on first use or by a probe.
    pub fn resolve(
        config: &BackendConfig,
        options: &BackendOptions,
        generation: u64,
    ) -> Result<Self, BackendInitError> {
        let kind = match config.mode() {
            BackendMode::External => {
                if config.is_ambiguous() {
                    warn!(
                        address = %config.external.address,
                        "cloud API key and external address both set; using the external scanner"
                    );
                }
                BackendKind::External(ExternalClient::new(&config.external, options)?)
            }
            BackendMode::Cloud => BackendKind::Cloud(CloudClient::new(&config.cloud, options)?),
        };

        Ok(Self {
            id: Uuid::new_v4(),
            generation,
            kind,
            state: AtomicU8::new(SessionState::Uninitialized as u8),
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn mode(&self) -> BackendMode {
        match &self.kind {
            BackendKind::Cloud(_) => BackendMode::Cloud,
            BackendKind::External(_) => BackendMode::External,
        }
    }

    pub fn descriptor(&self) -> String {
        match &self.kind {
            BackendKind::Cloud(client) => client.endpoint().to_string(),
            BackendKind::External(client) => client.descriptor(),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn activate(&self) {
        self.state
            .store(SessionState::Active as u8, Ordering::Release);
    }

    pub(crate) fn mark_draining(&self) {
        self.state
            .store(SessionState::Draining as u8, Ordering::Release);
    }

    /// Scan content the caller holds in full.
    pub async fn scan_buffer(
        &self,
        data: Bytes,
        ctx: &ScanContext,
    ) -> Result<RawVerdictPayload, BackendError> {
        match &self.kind {
            BackendKind::Cloud(client) => client.scan_buffer(data, ctx).await,
            BackendKind::External(client) => {
                let provider = BytesProvider::new(ctx.identifier.clone(), data);
                client.scan(&provider, ctx).await
            }
        }
    }

    /// Scan content the backend pulls range by range.
    pub async fn scan_stream(
        &self,
        provider: &dyn ContentProvider,
        ctx: &ScanContext,
    ) -> Result<RawVerdictPayload, BackendError> {
        match &self.kind {
            BackendKind::Cloud(client) => client.scan_stream(provider, ctx).await,
            BackendKind::External(client) => client.scan(provider, ctx).await,
        }
    }

    /// Minimal round-trip; returns a short description of the peer.
    pub async fn ping(&self) -> Result<String, BackendError> {
        match &self.kind {
            BackendKind::Cloud(client) => client.ping().await,
            BackendKind::External(client) => client.ping().await,
        }
    }
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("descriptor", &self.descriptor())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        let previous = SessionState::from_u8(
            self.state
                .swap(SessionState::Closed as u8, Ordering::AcqRel),
        );
        if previous != SessionState::Uninitialized {
            debug!(
                session_id = %self.id,
                generation = self.generation,
                "backend session closed"
            );
        }
    }
}
