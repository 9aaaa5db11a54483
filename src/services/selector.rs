//! Process-wide handle to the active backend session.
//!
//! Readers clone an `Arc` to the whole session under a short read lock, so a
//! scan always sees one complete session, never a half-swapped one. Every
//! installed session carries a generation number; a scan can compare its
//! session's generation against the current one to tell it ran on a session
//! that has since been replaced.

use crate::services::backend::BackendSession;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct BackendSelector {
    active: Arc<RwLock<Option<Arc<BackendSession>>>>,
    generations: Arc<AtomicU64>,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the generation number for the next session.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Active session, if one has been installed.
    pub async fn current(&self) -> Option<Arc<BackendSession>> {
        self.active.read().await.clone()
    }

    pub async fn is_current(&self, session: &BackendSession) -> bool {
        self.active
            .read()
            .await
            .as_ref()
            .is_some_and(|active| active.generation() == session.generation())
    }

    /// Make `session` the active one and return it with its predecessor.
    ///
    /// The predecessor is marked draining but left alive: scans that already
    /// hold it finish against it and it closes when the last one drops it.
    pub async fn install(
        &self,
        session: BackendSession,
    ) -> (Arc<BackendSession>, Option<Arc<BackendSession>>) {
        let session = Arc::new(session);
        session.activate();

        let previous = self.active.write().await.replace(session.clone());
        if let Some(previous) = &previous {
            previous.mark_draining();
        }
        (session, previous)
    }
}
