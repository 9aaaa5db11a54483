//! Backend reconfiguration and connectivity probing.
//!
//! The controller cycles `Idle -> Probing -> Swapping -> Idle`. Applies are
//! serialized behind one lock. Probes never touch the active session, so they
//! run concurrently and each stays within its own time budget. A new session
//! is always fully built before it replaces the old one; scans already holding
//! the old session are not waited for.

use crate::{
    models::backend_config::BackendConfig,
    services::{
        backend::{BackendError, BackendInitError, BackendOptions, BackendSession},
        selector::BackendSelector,
    },
};
use serde::Serialize;
use std::{
    error::Error as StdError,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    time::timeout,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconfigPhase {
    Idle,
    Probing,
    Swapping,
}

/// Why a candidate backend could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    MalformedAddress,
    MissingCredential,
    Unresolvable,
    NetworkUnreachable,
    ConnectionRefused,
    Timeout,
    TlsHandshake,
    CredentialRejected,
    Protocol,
    Other,
}

impl ProbeFailure {
    fn describe(self) -> &'static str {
        match self {
            ProbeFailure::MalformedAddress => "malformed address",
            ProbeFailure::MissingCredential => "missing API key",
            ProbeFailure::Unresolvable => "host could not be resolved",
            ProbeFailure::NetworkUnreachable => "network unreachable",
            ProbeFailure::ConnectionRefused => "connection refused",
            ProbeFailure::Timeout => "timed out",
            ProbeFailure::TlsHandshake => "TLS handshake failed",
            ProbeFailure::CredentialRejected => "credential rejected",
            ProbeFailure::Protocol => "unexpected response",
            ProbeFailure::Other => "unreachable",
        }
    }

    fn from_init(err: &BackendInitError) -> Self {
        match err {
            BackendInitError::InvalidAddress { .. } => ProbeFailure::MalformedAddress,
            BackendInitError::MissingCredential => ProbeFailure::MissingCredential,
            BackendInitError::Tls(_) => ProbeFailure::TlsHandshake,
            BackendInitError::HttpClient(_) => ProbeFailure::Other,
        }
    }

    fn from_backend(err: &BackendError) -> Self {
        match err {
            BackendError::Resolve { .. } => ProbeFailure::Unresolvable,
            BackendError::TlsHandshake { .. } => ProbeFailure::TlsHandshake,
            BackendError::Unauthorized(_) => ProbeFailure::CredentialRejected,
            BackendError::Timeout(_) => ProbeFailure::Timeout,
            BackendError::Http(http) if http.is_timeout() => ProbeFailure::Timeout,
            BackendError::Status { .. }
            | BackendError::ConnectionClosed
            | BackendError::Protocol(_)
            | BackendError::Engine(_) => ProbeFailure::Protocol,
            other => io_kind(other).map_or(ProbeFailure::Other, Self::from_io),
        }
    }

    fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => ProbeFailure::ConnectionRefused,
            io::ErrorKind::TimedOut => ProbeFailure::Timeout,
            io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
                ProbeFailure::NetworkUnreachable
            }
            _ => ProbeFailure::Other,
        }
    }
}

/// First I/O error kind found along the source chain.
fn io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub reachable: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
}

impl ProbeReport {
    fn reachable(detail: String) -> Self {
        Self {
            reachable: true,
            detail,
            failure: None,
        }
    }

    fn failed(failure: ProbeFailure, target: &str, cause: impl std::fmt::Display) -> Self {
        Self {
            reachable: false,
            detail: format!("{} ({}): {}", failure.describe(), target, cause),
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconfigError {
    #[error(transparent)]
    Init(#[from] BackendInitError),
    #[error("candidate backend failed verification: {}", .0.detail)]
    Unreachable(ProbeReport),
}

struct PhaseGuard<'a>(&'a watch::Sender<ReconfigPhase>);

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a watch::Sender<ReconfigPhase>, to: ReconfigPhase) -> Self {
        phase.send_replace(to);
        Self(phase)
    }

    fn advance(&self, to: ReconfigPhase) {
        self.0.send_replace(to);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ReconfigPhase::Idle);
    }
}

struct ProbeCount<'a>(&'a AtomicUsize);

impl<'a> ProbeCount<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for ProbeCount<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Clone)]
pub struct ReconfigService {
    selector: BackendSelector,
    options: BackendOptions,
    probe_timeout: Duration,
    lock: Arc<Mutex<()>>,
    phase: Arc<watch::Sender<ReconfigPhase>>,
    probes: Arc<AtomicUsize>,
}

impl ReconfigService {
    pub fn new(
        selector: BackendSelector,
        options: BackendOptions,
        probe_timeout: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(ReconfigPhase::Idle);
        Self {
            selector,
            options,
            probe_timeout,
            lock: Arc::new(Mutex::new(())),
            phase: Arc::new(phase),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Phase of the apply in progress; `Probing` while any probe runs.
    pub fn phase(&self) -> ReconfigPhase {
        match *self.phase.borrow() {
            ReconfigPhase::Idle if self.probes.load(Ordering::Acquire) > 0 => {
                ReconfigPhase::Probing
            }
            phase => phase,
        }
    }

    /// Check whether `config` would yield a working backend. The active
    /// session is left untouched.
    pub async fn probe(&self, config: &BackendConfig) -> ProbeReport {
        let _probing = ProbeCount::enter(&self.probes);

        let target = config.descriptor();
        let report = match BackendSession::resolve(config, &self.options, 0) {
            Ok(candidate) => self.round_trip(&candidate).await,
            Err(err) => ProbeReport::failed(ProbeFailure::from_init(&err), &target, err),
        };
        info!(
            backend = %target,
            reachable = report.reachable,
            detail = %report.detail,
            "backend probe finished"
        );
        report
    }

    /// Replace the active session with one built from `config`.
    ///
    /// With `verify` set the new session must answer a probe first. On any
    /// failure the previous session stays active.
    pub async fn apply(
        &self,
        config: BackendConfig,
        verify: bool,
    ) -> Result<Arc<BackendSession>, ReconfigError> {
        let _serial = self.lock.lock().await;
        let phase = PhaseGuard::enter(&self.phase, ReconfigPhase::Probing);

        let generation = self.selector.next_generation();
        let session = BackendSession::resolve(&config, &self.options, generation).map_err(|err| {
            warn!(generation, error = %err, "backend configuration rejected");
            err
        })?;

        if verify {
            let report = self.round_trip(&session).await;
            if !report.reachable {
                warn!(generation, detail = %report.detail, "backend verification failed");
                return Err(ReconfigError::Unreachable(report));
            }
        }

        phase.advance(ReconfigPhase::Swapping);
        let (active, previous) = self.selector.install(session).await;
        info!(
            generation,
            mode = %active.mode(),
            endpoint = %active.descriptor(),
            previous_generation = previous.as_ref().map(|p| p.generation()),
            "backend session installed"
        );
        Ok(active)
    }

    async fn round_trip(&self, session: &BackendSession) -> ProbeReport {
        let target = session.descriptor();
        match timeout(self.probe_timeout, session.ping()).await {
            Ok(Ok(peer)) => ProbeReport::reachable(format!("reachable ({}): {}", target, peer)),
            Ok(Err(err)) => ProbeReport::failed(ProbeFailure::from_backend(&err), &target, err),
            Err(_) => ProbeReport::failed(
                ProbeFailure::Timeout,
                &target,
                format!("no answer within {:?}", self.probe_timeout),
            ),
        }
    }
}
