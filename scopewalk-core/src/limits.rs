//! Record-cap backpressure.
//!
//! Level-triggered: called after every counter-changing store write. Raising
//! a target's cap later does not auto-resume paused sessions.

use crate::data::{Database, Result};
use scopewalk_engine::drivers::{Extractor, NavigationDriver};
use scopewalk_engine::engine::{CrawlEngine, SessionId};
use scopewalk_engine::snapshot::SnapshotStore;

/// Pause every running session bound to `target_id` when its record count
/// has reached the configured cap. Returns the sessions that were paused.
pub async fn enforce_limit<N, X, S>(
    db: &Database,
    engine: &CrawlEngine<N, X, S>,
    target_id: &str,
) -> Result<Vec<SessionId>>
where
    N: NavigationDriver,
    X: Extractor,
    S: SnapshotStore,
{
    if db.limit_reached(target_id)? {
        Ok(engine.force_limit(target_id).await)
    } else {
        Ok(Vec::new())
    }
}
