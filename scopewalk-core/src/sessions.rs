//! Sqlite-backed durable session snapshots.

use crate::data::Database;
use scopewalk_engine::engine::SessionId;
use scopewalk_engine::snapshot::{CrawlSnapshot, SnapshotStore};
use std::sync::Arc;

/// Adapts [`Database`] to the engine's [`SnapshotStore`] contract.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SnapshotStore for SessionStore {
    fn save(&self, session: SessionId, snapshot: &CrawlSnapshot) -> anyhow::Result<()> {
        self.db.save_snapshot(session, snapshot)?;
        Ok(())
    }

    fn load(&self, session: SessionId) -> anyhow::Result<Option<CrawlSnapshot>> {
        Ok(self.db.load_snapshot(session)?)
    }

    fn remove(&self, session: SessionId) -> anyhow::Result<()> {
        self.db.remove_snapshot(session)?;
        Ok(())
    }

    fn load_all(&self) -> anyhow::Result<Vec<(SessionId, CrawlSnapshot)>> {
        Ok(self.db.load_all_snapshots()?)
    }
}
