//! Durable per-session crawl snapshots.
//!
//! Every mutation of a session's queue, seen set, visiting slot or running
//! flag is flushed through a [`SnapshotStore`] so an interrupted process can
//! rehydrate its running crawls on restart.

use crate::engine::{QueueItem, SessionId, StopReason};
use crate::url::QueryMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Serialized form of one session's crawl state. Carries the target spec
/// fields alongside the frontier so a snapshot alone is enough to resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSnapshot {
    pub target_id: String,
    pub origin: String,
    pub scope_path: String,
    pub ignore_hash: bool,
    pub normalize_query: QueryMode,
    pub running: bool,
    pub max_depth: u32,
    pub rate_ms: u64,
    pub collect_ms: u64,
    pub queue: Vec<QueueItem>,
    pub seen: Vec<String>,
    pub visiting: Option<QueueItem>,
    pub visited: u64,
    pub reason: Option<StopReason>,
}

pub trait SnapshotStore: Send + Sync + 'static {
    fn save(&self, session: SessionId, snapshot: &CrawlSnapshot) -> anyhow::Result<()>;
    fn load(&self, session: SessionId) -> anyhow::Result<Option<CrawlSnapshot>>;
    fn remove(&self, session: SessionId) -> anyhow::Result<()>;
    fn load_all(&self) -> anyhow::Result<Vec<(SessionId, CrawlSnapshot)>>;
}

impl<T: SnapshotStore> SnapshotStore for std::sync::Arc<T> {
    fn save(&self, session: SessionId, snapshot: &CrawlSnapshot) -> anyhow::Result<()> {
        (**self).save(session, snapshot)
    }

    fn load(&self, session: SessionId) -> anyhow::Result<Option<CrawlSnapshot>> {
        (**self).load(session)
    }

    fn remove(&self, session: SessionId) -> anyhow::Result<()> {
        (**self).remove(session)
    }

    fn load_all(&self) -> anyhow::Result<Vec<(SessionId, CrawlSnapshot)>> {
        (**self).load_all()
    }
}

/// In-memory store for tests and ephemeral one-shot crawls.
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<HashMap<SessionId, CrawlSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, session: SessionId, snapshot: &CrawlSnapshot) -> anyhow::Result<()> {
        self.inner
            .lock()
            .expect("snapshot lock poisoned")
            .insert(session, snapshot.clone());
        Ok(())
    }

    fn load(&self, session: SessionId) -> anyhow::Result<Option<CrawlSnapshot>> {
        Ok(self
            .inner
            .lock()
            .expect("snapshot lock poisoned")
            .get(&session)
            .cloned())
    }

    fn remove(&self, session: SessionId) -> anyhow::Result<()> {
        self.inner
            .lock()
            .expect("snapshot lock poisoned")
            .remove(&session);
        Ok(())
    }

    fn load_all(&self) -> anyhow::Result<Vec<(SessionId, CrawlSnapshot)>> {
        Ok(self
            .inner
            .lock()
            .expect("snapshot lock poisoned")
            .iter()
            .map(|(id, snap)| (*id, snap.clone()))
            .collect())
    }
}
