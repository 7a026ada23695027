//! Per-session breadth-first crawl state machine.
//!
//! Each browsing session owns exactly one [`CrawlState`] held in an
//! engine-owned registry. All mutations happen in response to discrete
//! events (start, tick, discovery, navigation-committed, pause, stop, skip,
//! enqueue) behind one lock, so a session is single-writer while different
//! sessions run concurrently. Pacing delays are plain tokio timers whose
//! continuations re-validate state on wake, which makes a stale timer
//! harmless. Every state change is flushed to the snapshot store so running
//! crawls survive a process restart.

use crate::classify::{Kind, classify_kind, in_scope};
use crate::drivers::{Extractor, NavigationDriver};
use crate::error::{EngineError, EnqueueOutcome, EnqueueReason, Result};
use crate::snapshot::{CrawlSnapshot, SnapshotStore};
use crate::url::{CanonicalOpts, QueryMode, canonicalize, to_absolute};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type SessionId = u64;

/// Extraction settle time granted after each committed navigation.
pub const DEFAULT_COLLECT_MS: u64 = 400;

/// One frontier entry: an absolute URL and its BFS depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub url: String,
    pub depth: u32,
}

/// Why a session is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Paused,
    Stopped,
    Limit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Paused => "paused",
            StopReason::Stopped => "stopped",
            StopReason::Limit => "limit",
        }
    }
}

/// The engine-facing projection of a target: identity, scope and the
/// canonicalization settings that define URL identity for this crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub target_id: String,
    pub origin: String,
    pub scope_path: String,
    pub ignore_hash: bool,
    pub normalize_query: QueryMode,
    pub deep_mode: bool,
}

impl TargetSpec {
    pub fn canonical_opts(&self) -> CanonicalOpts {
        CanonicalOpts {
            ignore_hash: self.ignore_hash,
            query: self.normalize_query,
            strip_index_html: true,
        }
    }

    fn canonical(&self, abs: &str) -> String {
        canonicalize(abs, self.canonical_opts())
    }

    fn admits(&self, abs: &str) -> bool {
        in_scope(&self.origin, &self.scope_path, abs)
    }
}

/// Point-in-time view of a session, reported to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStatus {
    pub target_id: String,
    pub running: bool,
    pub max_depth: u32,
    pub rate_ms: u64,
    pub queue_len: usize,
    pub visiting: Option<QueueItem>,
    pub visited: u64,
    pub reason: Option<StopReason>,
}

/// Callback invoked on every observable state change. `None` means the
/// session was torn down.
pub type StatusCallback = Arc<dyn Fn(SessionId, Option<CrawlStatus>) + Send + Sync>;

struct CrawlState {
    spec: TargetSpec,
    running: bool,
    max_depth: u32,
    rate_ms: u64,
    collect_ms: u64,
    queue: VecDeque<QueueItem>,
    seen: HashSet<String>,
    visiting: Option<QueueItem>,
    visited: u64,
    reason: Option<StopReason>,
}

impl CrawlState {
    fn status(&self) -> CrawlStatus {
        CrawlStatus {
            target_id: self.spec.target_id.clone(),
            running: self.running,
            max_depth: self.max_depth,
            rate_ms: self.rate_ms,
            queue_len: self.queue.len(),
            visiting: self.visiting.clone(),
            visited: self.visited,
            reason: self.reason,
        }
    }

    fn snapshot(&self) -> CrawlSnapshot {
        CrawlSnapshot {
            target_id: self.spec.target_id.clone(),
            origin: self.spec.origin.clone(),
            scope_path: self.spec.scope_path.clone(),
            ignore_hash: self.spec.ignore_hash,
            normalize_query: self.spec.normalize_query,
            running: self.running,
            max_depth: self.max_depth,
            rate_ms: self.rate_ms,
            collect_ms: self.collect_ms,
            queue: self.queue.iter().cloned().collect(),
            seen: self.seen.iter().cloned().collect(),
            visiting: self.visiting.clone(),
            visited: self.visited,
            reason: self.reason,
        }
    }

    fn from_snapshot(snap: &CrawlSnapshot) -> Self {
        let mut queue: VecDeque<QueueItem> = snap.queue.iter().cloned().collect();
        // A visit that never committed died with the old process. Its commit
        // event will never arrive, so it goes back to the frontier head.
        if let Some(stale) = snap.visiting.clone() {
            queue.push_front(stale);
        }
        Self {
            spec: TargetSpec {
                target_id: snap.target_id.clone(),
                origin: snap.origin.clone(),
                scope_path: snap.scope_path.clone(),
                ignore_hash: snap.ignore_hash,
                normalize_query: snap.normalize_query,
                deep_mode: false,
            },
            running: snap.running,
            max_depth: snap.max_depth,
            rate_ms: snap.rate_ms,
            collect_ms: snap.collect_ms,
            queue,
            seen: snap.seen.iter().cloned().collect(),
            visiting: None,
            visited: snap.visited,
            reason: snap.reason,
        }
    }
}

pub struct CrawlEngine<N, X, S> {
    nav: N,
    extractor: X,
    snapshots: S,
    sessions: Mutex<HashMap<SessionId, CrawlState>>,
    status_callback: OnceLock<StatusCallback>,
    // self-handle for the delayed continuations spawned by pacing timers
    weak: Weak<CrawlEngine<N, X, S>>,
}

impl<N, X, S> CrawlEngine<N, X, S>
where
    N: NavigationDriver,
    X: Extractor,
    S: SnapshotStore,
{
    pub fn new(nav: N, extractor: X, snapshots: S) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            nav,
            extractor,
            snapshots,
            sessions: Mutex::new(HashMap::new()),
            status_callback: OnceLock::new(),
            weak: weak.clone(),
        })
    }

    /// Install the status listener. Only the first call takes effect.
    pub fn set_status_callback(&self, callback: StatusCallback) {
        let _ = self.status_callback.set(callback);
    }

    fn broadcast(&self, session: SessionId, status: Option<CrawlStatus>) {
        if let Some(cb) = self.status_callback.get() {
            cb(session, status);
        }
    }

    /// Re-attempt `tick` after a pacing delay. The continuation re-validates
    /// session state on wake, so firing late or after teardown is harmless.
    fn schedule_tick(&self, session: SessionId, delay_ms: u64) {
        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            engine.tick(session).await;
        });
    }

    fn schedule_finish(&self, session: SessionId, delay_ms: u64) {
        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            engine.finish_visit(session).await;
        });
    }

    /// Snapshot persistence is best-effort: a failing store must never stall
    /// the crawl itself.
    fn persist(&self, session: SessionId, snapshot: Option<&CrawlSnapshot>) {
        let res = match snapshot {
            Some(snap) => self.snapshots.save(session, snap),
            None => self.snapshots.remove(session),
        };
        if let Err(e) = res {
            warn!(session, "failed to persist crawl snapshot: {e}");
        }
    }

    /// Begin a crawl for `session` at `seed_url`. Seeds the frontier at depth
    /// zero, marks the canonical seed as seen, arms the extractor and
    /// immediately attempts the first navigation.
    pub async fn start(
        &self,
        session: SessionId,
        seed_url: &str,
        spec: TargetSpec,
        max_depth: u32,
        rate_ms: u64,
    ) -> Result<()> {
        let seed_abs = to_absolute(seed_url, seed_url)
            .ok_or_else(|| EngineError::InvalidUrl(seed_url.to_string()))?;
        let seed_canon = spec.canonical(&seed_abs);
        info!(session, seed = %seed_abs, max_depth, rate_ms, "starting crawl");

        let state = CrawlState {
            spec: spec.clone(),
            running: true,
            max_depth,
            rate_ms,
            collect_ms: DEFAULT_COLLECT_MS,
            queue: VecDeque::from([QueueItem {
                url: seed_abs,
                depth: 0,
            }]),
            seen: HashSet::from([seed_canon]),
            visiting: None,
            visited: 0,
            reason: None,
        };
        let status = state.status();
        let snap = state.snapshot();
        self.sessions.lock().await.insert(session, state);

        self.extractor
            .enable(
                session,
                spec.target_id.clone(),
                spec.scope_path.clone(),
                spec.deep_mode,
            )
            .await;
        self.broadcast(session, Some(status));
        self.persist(session, Some(&snap));
        self.tick(session).await;
        Ok(())
    }

    /// Advance the session: dequeue the frontier head and navigate to it.
    /// No-op while a navigation is in flight; an empty frontier ends the
    /// crawl naturally.
    pub async fn tick(&self, session: SessionId) {
        enum Step {
            Noop,
            Drained(CrawlSnapshot, CrawlStatus),
            Navigate(QueueItem, u64, CrawlSnapshot, CrawlStatus),
        }

        let step = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return;
            };
            if !s.running || s.visiting.is_some() {
                Step::Noop
            } else if let Some(next) = s.queue.pop_front() {
                s.visiting = Some(next.clone());
                s.reason = None;
                Step::Navigate(next, s.rate_ms, s.snapshot(), s.status())
            } else {
                s.running = false;
                Step::Drained(s.snapshot(), s.status())
            }
        };

        match step {
            Step::Noop => {}
            Step::Drained(snap, status) => {
                debug!(session, "frontier drained, crawl complete");
                self.broadcast(session, Some(status));
                self.persist(session, Some(&snap));
            }
            Step::Navigate(next, rate_ms, snap, status) => {
                self.broadcast(session, Some(status));
                self.persist(session, Some(&snap));
                if !self.nav.navigate(session, next.url.clone()).await {
                    warn!(session, url = %next.url, "navigation refused, retrying after delay");
                    {
                        let mut sessions = self.sessions.lock().await;
                        if let Some(s) = sessions.get_mut(&session) {
                            s.visiting = None;
                        }
                    }
                    self.schedule_tick(session, rate_ms);
                }
            }
        }
    }

    /// Feed a discovered-link batch into frontier admission. Only in-scope,
    /// unseen page URLs are admitted, one level below the page being visited
    /// and never beyond `max_depth`. Admitted URLs join `seen` immediately so
    /// concurrent batches cannot double-enqueue.
    pub async fn on_links_discovered(
        &self,
        session: SessionId,
        base_url: &str,
        hrefs: &[String],
        spec: &TargetSpec,
    ) {
        let update = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return;
            };
            if !s.running {
                return;
            }
            let parent_depth = s.visiting.as_ref().map(|v| v.depth).unwrap_or(0);
            let next_depth = parent_depth + 1;
            if next_depth > s.max_depth {
                return;
            }
            let mut admitted = 0usize;
            for raw in hrefs {
                let Some(abs) = to_absolute(raw, base_url) else {
                    continue;
                };
                if !spec.admits(&abs) {
                    continue;
                }
                let canon = spec.canonical(&abs);
                if s.seen.contains(&canon) {
                    continue;
                }
                if classify_kind(&canon) != Kind::Page {
                    continue;
                }
                s.seen.insert(canon);
                s.queue.push_back(QueueItem {
                    url: abs,
                    depth: next_depth,
                });
                admitted += 1;
            }
            debug!(session, admitted, total = hrefs.len(), "frontier admission");
            (s.snapshot(), s.status())
        };
        self.broadcast(session, Some(update.1));
        self.persist(session, Some(&update.0));
    }

    /// A navigation committed on the session. Requests an immediate harvest,
    /// then after the settle + pacing delay counts the visit, clears the
    /// in-flight slot and ticks again.
    pub async fn on_navigation_committed(&self, session: SessionId, url: &str) {
        let wait = {
            let sessions = self.sessions.lock().await;
            let Some(s) = sessions.get(&session) else {
                return;
            };
            if !s.running {
                return;
            }
            s.collect_ms + s.rate_ms
        };
        debug!(session, url, "navigation committed, requesting extraction");
        self.extractor.extract_now(session).await;

        self.schedule_finish(session, wait);
    }

    async fn finish_visit(&self, session: SessionId) {
        let update = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return;
            };
            if s.visiting.take().is_some() {
                s.visited += 1;
            }
            (s.snapshot(), s.status())
        };
        self.broadcast(session, Some(update.1));
        self.persist(session, Some(&update.0));
        self.tick(session).await;
    }

    /// Suspend the crawl, keeping queue and seen set for resumption.
    pub async fn pause(&self, session: SessionId) {
        self.halt(session, StopReason::Paused, false).await;
    }

    /// Terminate the crawl and discard the frontier.
    pub async fn stop(&self, session: SessionId) {
        self.halt(session, StopReason::Stopped, true).await;
    }

    async fn halt(&self, session: SessionId, reason: StopReason, clear: bool) {
        let update = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return;
            };
            s.running = false;
            s.reason = Some(reason);
            if clear {
                s.queue.clear();
                s.visiting = None;
            }
            (s.snapshot(), s.status())
        };
        info!(session, reason = reason.as_str(), "crawl halted");
        self.broadcast(session, Some(update.1));
        self.persist(session, Some(&update.0));
    }

    /// Empty the frontier without changing the running flag.
    pub async fn clear_queue(&self, session: SessionId) {
        let update = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return;
            };
            s.queue.clear();
            (s.snapshot(), s.status())
        };
        self.broadcast(session, Some(update.1));
        self.persist(session, Some(&update.0));
    }

    /// Drop the in-flight item and force-navigate to the next frontier head
    /// without waiting for a natural commit.
    pub async fn skip(&self, session: SessionId) {
        let action = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return;
            };
            if let Some(next) = s.queue.pop_front() {
                s.visiting = Some(next.clone());
                s.reason = None;
                (Some(next.url), s.snapshot(), s.status())
            } else {
                s.visiting = None;
                (None, s.snapshot(), s.status())
            }
        };
        self.broadcast(session, Some(action.2));
        self.persist(session, Some(&action.1));
        if let Some(url) = action.0 {
            // best-effort: a refusal here surfaces as a stuck visit the user
            // can skip again
            let _ = self.nav.navigate(session, url).await;
        }
    }

    /// Drop up to `n` queued items without navigating.
    pub async fn skip_n(&self, session: SessionId, n: usize) {
        if n == 0 {
            return;
        }
        let update = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return;
            };
            let n = n.min(s.queue.len());
            s.queue.drain(..n);
            (s.snapshot(), s.status())
        };
        self.broadcast(session, Some(update.1));
        self.persist(session, Some(&update.0));
    }

    /// Manually inject a URL through the same admission pipeline discovery
    /// uses. Rejections come back as typed outcomes.
    pub async fn enqueue(&self, session: SessionId, raw_url: &str) -> Result<EnqueueOutcome> {
        let raw = raw_url.trim();
        if raw.is_empty() {
            return Ok(EnqueueOutcome::rejected(EnqueueReason::BadUrl));
        }
        let base = self.nav.current_url(session).await;

        let update = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return Err(EngineError::UnknownSession(session));
            };
            let Some(abs) = to_absolute(raw, base.as_deref().unwrap_or(raw)) else {
                return Ok(EnqueueOutcome::rejected(EnqueueReason::BadUrl));
            };
            if !s.spec.admits(&abs) {
                return Ok(EnqueueOutcome::rejected(EnqueueReason::OutOfScope));
            }
            let canon = s.spec.canonical(&abs);
            if s.seen.contains(&canon) {
                return Ok(EnqueueOutcome::rejected(EnqueueReason::Duplicate));
            }
            if classify_kind(&canon) != Kind::Page {
                return Ok(EnqueueOutcome::rejected(EnqueueReason::NotPage));
            }
            s.seen.insert(canon);
            let depth = s
                .visiting
                .as_ref()
                .map(|v| (v.depth + 1).min(s.max_depth))
                .unwrap_or(0);
            s.queue.push_back(QueueItem { url: abs, depth });
            (s.snapshot(), s.status())
        };
        self.broadcast(session, Some(update.1));
        self.persist(session, Some(&update.0));
        Ok(EnqueueOutcome::accepted())
    }

    /// Force every running session bound to `target_id` out of `Running`
    /// with reason `limit` and disable its extraction. Returns the affected
    /// sessions.
    pub async fn force_limit(&self, target_id: &str) -> Vec<SessionId> {
        let updates = {
            let mut sessions = self.sessions.lock().await;
            let mut updates = Vec::new();
            for (id, s) in sessions.iter_mut() {
                if s.spec.target_id == target_id && s.running {
                    s.running = false;
                    s.reason = Some(StopReason::Limit);
                    updates.push((*id, s.snapshot(), s.status()));
                }
            }
            updates
        };
        let mut affected = Vec::with_capacity(updates.len());
        for (id, snap, status) in updates {
            info!(session = id, target_id, "record limit reached, pausing crawl");
            self.extractor.disable(id).await;
            self.broadcast(id, Some(status));
            self.persist(id, Some(&snap));
            affected.push(id);
        }
        affected
    }

    /// Session teardown: drop state and the persisted snapshot.
    pub async fn remove_session(&self, session: SessionId) {
        let existed = self.sessions.lock().await.remove(&session).is_some();
        if existed {
            self.extractor.disable(session).await;
            self.broadcast(session, None);
        }
        self.persist(session, None);
    }

    /// Rebuild sessions from persisted snapshots, re-arm extraction for the
    /// running ones and re-tick them. Returns how many sessions were resumed.
    pub async fn rehydrate(&self) -> usize {
        let snaps = match self.snapshots.load_all() {
            Ok(snaps) => snaps,
            Err(e) => {
                warn!("failed to load crawl snapshots: {e}");
                return 0;
            }
        };
        let mut statuses = Vec::new();
        let mut to_tick = Vec::new();
        {
            let mut sessions = self.sessions.lock().await;
            for (id, snap) in snaps {
                let state = CrawlState::from_snapshot(&snap);
                if state.running {
                    to_tick.push((id, state.spec.clone()));
                }
                statuses.push((id, state.status()));
                sessions.insert(id, state);
            }
        }
        for (id, status) in statuses {
            self.broadcast(id, Some(status));
        }
        let resumed = to_tick.len();
        for (id, spec) in to_tick {
            debug!(session = id, "rehydrated running crawl");
            self.extractor
                .enable(id, spec.target_id, spec.scope_path, spec.deep_mode)
                .await;
            self.tick(id).await;
        }
        resumed
    }

    /// Put a halted session back into `Running` and tick it. The frontier and
    /// seen set are whatever the halt left behind; a stopped session with a
    /// cleared queue simply drains on the next tick.
    pub async fn resume(&self, session: SessionId) -> Result<()> {
        let update = {
            let mut sessions = self.sessions.lock().await;
            let Some(s) = sessions.get_mut(&session) else {
                return Err(EngineError::UnknownSession(session));
            };
            s.running = true;
            s.reason = None;
            // a visit interrupted by the halt may never see its commit;
            // put it back at the frontier head
            if let Some(stale) = s.visiting.take() {
                s.queue.push_front(stale);
            }
            (s.spec.clone(), s.snapshot(), s.status())
        };
        info!(session, "resuming crawl");
        self.extractor
            .enable(
                session,
                update.0.target_id.clone(),
                update.0.scope_path.clone(),
                update.0.deep_mode,
            )
            .await;
        self.broadcast(session, Some(update.2));
        self.persist(session, Some(&update.1));
        self.tick(session).await;
        Ok(())
    }

    pub async fn status(&self, session: SessionId) -> Option<CrawlStatus> {
        self.sessions
            .lock()
            .await
            .get(&session)
            .map(CrawlState::status)
    }

    /// The first `limit` frontier entries (all of them when `limit` is 0).
    pub async fn queued(&self, session: SessionId, limit: usize) -> Vec<QueueItem> {
        let sessions = self.sessions.lock().await;
        let Some(s) = sessions.get(&session) else {
            return Vec::new();
        };
        let take = if limit == 0 { s.queue.len() } else { limit };
        s.queue.iter().take(take).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshotStore;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct MockNav {
        inner: Arc<MockNavInner>,
    }

    #[derive(Default)]
    struct MockNavInner {
        refuse: StdMutex<HashSet<String>>,
        attempts: StdMutex<Vec<String>>,
        current: StdMutex<HashMap<SessionId, String>>,
    }

    impl MockNav {
        fn refuse(&self, url: &str) {
            self.inner.refuse.lock().unwrap().insert(url.to_string());
        }

        fn attempts(&self) -> Vec<String> {
            self.inner.attempts.lock().unwrap().clone()
        }
    }

    impl NavigationDriver for MockNav {
        async fn current_url(&self, session: SessionId) -> Option<String> {
            self.inner.current.lock().unwrap().get(&session).cloned()
        }

        async fn navigate(&self, session: SessionId, url: String) -> bool {
            self.inner.attempts.lock().unwrap().push(url.clone());
            if self.inner.refuse.lock().unwrap().contains(&url) {
                return false;
            }
            self.inner.current.lock().unwrap().insert(session, url);
            true
        }

        async fn open_passive(&self, _session: SessionId, _url: String) -> Option<SessionId> {
            None
        }
    }

    #[derive(Clone, Default)]
    struct MockExtractor {
        inner: Arc<MockExtractorInner>,
    }

    #[derive(Default)]
    struct MockExtractorInner {
        enabled: StdMutex<HashSet<SessionId>>,
        extract_calls: StdMutex<usize>,
    }

    impl MockExtractor {
        fn is_enabled(&self, session: SessionId) -> bool {
            self.inner.enabled.lock().unwrap().contains(&session)
        }

        fn extract_calls(&self) -> usize {
            *self.inner.extract_calls.lock().unwrap()
        }
    }

    impl Extractor for MockExtractor {
        async fn enable(
            &self,
            session: SessionId,
            _target_id: String,
            _scope_path: String,
            _deep_mode: bool,
        ) {
            self.inner.enabled.lock().unwrap().insert(session);
        }

        async fn disable(&self, session: SessionId) {
            self.inner.enabled.lock().unwrap().remove(&session);
        }

        async fn extract_now(&self, _session: SessionId) {
            *self.inner.extract_calls.lock().unwrap() += 1;
        }
    }

    type TestEngine = CrawlEngine<MockNav, MockExtractor, Arc<MemorySnapshotStore>>;

    fn docs_spec() -> TargetSpec {
        TargetSpec {
            target_id: "https://ex.com/docs/".to_string(),
            origin: "https://ex.com".to_string(),
            scope_path: "/docs/".to_string(),
            ignore_hash: true,
            normalize_query: QueryMode::Sort,
            deep_mode: false,
        }
    }

    fn test_engine() -> (Arc<TestEngine>, MockNav, MockExtractor, Arc<MemorySnapshotStore>) {
        let nav = MockNav::default();
        let ext = MockExtractor::default();
        let store = Arc::new(MemorySnapshotStore::new());
        let engine = CrawlEngine::new(nav.clone(), ext.clone(), store.clone());
        (engine, nav, ext, store)
    }

    /// Let paused-clock timers fire and spawned continuations run.
    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    const SEED: &str = "https://ex.com/docs/";

    #[tokio::test(start_paused = true)]
    async fn start_seeds_frontier_and_navigates() {
        let (engine, nav, ext, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();

        assert_eq!(nav.attempts(), vec![SEED.to_string()]);
        assert!(ext.is_enabled(1));
        let status = engine.status(1).await.unwrap();
        assert!(status.running);
        assert_eq!(status.queue_len, 0);
        assert_eq!(status.visiting.unwrap().url, SEED);
        assert_eq!(status.visited, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_bad_seed() {
        let (engine, _, _, _) = test_engine();
        let err = engine.start(1, "mailto:x@ex.com", docs_spec(), 2, 0).await;
        assert!(matches!(err, Err(EngineError::InvalidUrl(_))));
        assert!(engine.status(1).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_admits_only_in_scope_unseen_pages() {
        let (engine, nav, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 1, 0).await.unwrap();
        engine.on_navigation_committed(1, SEED).await;
        engine
            .on_links_discovered(
                1,
                SEED,
                &[
                    "/docs/a".to_string(),
                    "/docs/a.png".to_string(),
                    "/other/".to_string(),
                    "https://else.com/docs/x".to_string(),
                ],
                &docs_spec(),
            )
            .await;

        let queued = engine.queued(1, 0).await;
        assert_eq!(
            queued,
            vec![QueueItem {
                url: "https://ex.com/docs/a".to_string(),
                depth: 1,
            }]
        );

        settle(500).await;
        assert_eq!(
            nav.attempts(),
            vec![SEED.to_string(), "https://ex.com/docs/a".to_string()]
        );
        let status = engine.status(1).await.unwrap();
        assert_eq!(status.visited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn depth_zero_visits_only_the_seed() {
        let (engine, nav, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 0, 0).await.unwrap();
        engine.on_navigation_committed(1, SEED).await;
        engine
            .on_links_discovered(1, SEED, &["/docs/a".to_string()], &docs_spec())
            .await;

        assert!(engine.queued(1, 0).await.is_empty());
        settle(500).await;

        let status = engine.status(1).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.visited, 1);
        assert_eq!(status.reason, None);
        assert_eq!(nav.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_canonical_forms_enqueue_once() {
        let (engine, _, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine
            .on_links_discovered(
                1,
                SEED,
                &["/docs/a".to_string(), "/docs/a#frag".to_string()],
                &docs_spec(),
            )
            .await;
        engine
            .on_links_discovered(1, SEED, &["/docs/a".to_string()], &docs_spec())
            .await;

        assert_eq!(engine.queued(1, 0).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_dequeue_while_a_navigation_is_in_flight() {
        let (engine, nav, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine
            .on_links_discovered(1, SEED, &["/docs/a".to_string()], &docs_spec())
            .await;

        engine.tick(1).await;
        engine.tick(1).await;

        let status = engine.status(1).await.unwrap();
        assert_eq!(status.visiting.unwrap().url, SEED);
        assert_eq!(status.queue_len, 1);
        assert_eq!(nav.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_preserves_frontier_stop_discards_it() {
        let (engine, _, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine
            .on_links_discovered(1, SEED, &["/docs/a".to_string()], &docs_spec())
            .await;

        engine.pause(1).await;
        let status = engine.status(1).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.reason, Some(StopReason::Paused));
        assert_eq!(status.queue_len, 1);

        engine.stop(1).await;
        let status = engine.status(1).await.unwrap();
        assert_eq!(status.reason, Some(StopReason::Stopped));
        assert_eq!(status.queue_len, 0);
        assert!(status.visiting.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_session_ignores_discovery_and_ticks() {
        let (engine, nav, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine.pause(1).await;

        engine
            .on_links_discovered(1, SEED, &["/docs/a".to_string()], &docs_spec())
            .await;
        engine.tick(1).await;

        let status = engine.status(1).await.unwrap();
        assert_eq!(status.queue_len, 0);
        assert_eq!(nav.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_rejects_with_typed_reasons() {
        let (engine, _, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();

        assert_eq!(
            engine.enqueue(1, "").await.unwrap(),
            EnqueueOutcome::rejected(EnqueueReason::BadUrl)
        );
        assert_eq!(
            engine.enqueue(1, "https://[bad").await.unwrap(),
            EnqueueOutcome::rejected(EnqueueReason::BadUrl)
        );
        assert_eq!(
            engine.enqueue(1, "https://ex.com/blog/x").await.unwrap(),
            EnqueueOutcome::rejected(EnqueueReason::OutOfScope)
        );
        assert_eq!(
            engine.enqueue(1, SEED).await.unwrap(),
            EnqueueOutcome::rejected(EnqueueReason::Duplicate)
        );
        assert_eq!(
            engine.enqueue(1, "/docs/logo.png").await.unwrap(),
            EnqueueOutcome::rejected(EnqueueReason::NotPage)
        );

        let outcome = engine.enqueue(1, "/docs/manual").await.unwrap();
        assert!(outcome.enqueued);
        let queued = engine.queued(1, 0).await;
        // depth follows the page in flight: seed depth 0 + 1
        assert_eq!(
            queued.last().unwrap(),
            &QueueItem {
                url: "https://ex.com/docs/manual".to_string(),
                depth: 1,
            }
        );

        assert!(matches!(
            engine.enqueue(99, "/docs/x").await,
            Err(EngineError::UnknownSession(99))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_navigation_retries_after_rate_delay() {
        let (engine, nav, _, _) = test_engine();
        nav.refuse(SEED);
        engine.start(1, SEED, docs_spec(), 2, 100).await.unwrap();

        assert_eq!(nav.attempts().len(), 1);
        settle(150).await;
        assert!(nav.attempts().len() >= 2);

        let status = engine.status(1).await.unwrap();
        assert!(status.running);
        assert!(status.visiting.is_none() || status.visiting.unwrap().url == SEED);
        engine.stop(1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn force_limit_pauses_only_sessions_of_the_target() {
        let (engine, _, ext, _) = test_engine();
        let other = TargetSpec {
            target_id: "https://other.com/".to_string(),
            origin: "https://other.com".to_string(),
            scope_path: "/".to_string(),
            ..docs_spec()
        };
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine.start(2, SEED, docs_spec(), 2, 0).await.unwrap();
        engine
            .start(3, "https://other.com/", other, 2, 0)
            .await
            .unwrap();

        let mut affected = engine.force_limit("https://ex.com/docs/").await;
        affected.sort_unstable();
        assert_eq!(affected, vec![1, 2]);

        for session in [1, 2] {
            let status = engine.status(session).await.unwrap();
            assert!(!status.running);
            assert_eq!(status.reason, Some(StopReason::Limit));
            assert!(!ext.is_enabled(session));
        }
        let status = engine.status(3).await.unwrap();
        assert!(status.running);
        assert!(ext.is_enabled(3));

        // level-triggered: a second invocation finds nothing left to pause
        assert!(engine.force_limit("https://ex.com/docs/").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_drops_in_flight_and_renavigates() {
        let (engine, nav, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine
            .on_links_discovered(
                1,
                SEED,
                &["/docs/a".to_string(), "/docs/b".to_string()],
                &docs_spec(),
            )
            .await;

        engine.skip(1).await;
        let status = engine.status(1).await.unwrap();
        assert_eq!(status.visiting.unwrap().url, "https://ex.com/docs/a");
        assert_eq!(status.queue_len, 1);
        assert_eq!(
            nav.attempts(),
            vec![SEED.to_string(), "https://ex.com/docs/a".to_string()]
        );

        // nothing queued: skip just clears the in-flight slot
        engine.clear_queue(1).await;
        engine.skip(1).await;
        assert!(engine.status(1).await.unwrap().visiting.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_n_drops_queued_items_without_navigating() {
        let (engine, nav, _, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine
            .on_links_discovered(
                1,
                SEED,
                &[
                    "/docs/a".to_string(),
                    "/docs/b".to_string(),
                    "/docs/c".to_string(),
                ],
                &docs_spec(),
            )
            .await;

        engine.skip_n(1, 2).await;
        let queued = engine.queued(1, 0).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].url, "https://ex.com/docs/c");
        assert_eq!(nav.attempts().len(), 1);

        engine.skip_n(1, 10).await;
        assert!(engine.queued(1, 0).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn committed_navigation_requests_extraction() {
        let (engine, _, ext, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        assert_eq!(ext.extract_calls(), 0);
        engine.on_navigation_committed(1, SEED).await;
        assert_eq!(ext.extract_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_survive_an_engine_restart() {
        let (engine, _, _, store) = test_engine();
        engine.start(7, SEED, docs_spec(), 2, 50).await.unwrap();
        engine
            .on_links_discovered(1_000_000, SEED, &["/docs/a".to_string()], &docs_spec())
            .await; // unknown session, ignored
        engine
            .on_links_discovered(7, SEED, &["/docs/a".to_string()], &docs_spec())
            .await;

        // fresh engine over the same snapshot store
        let nav2 = MockNav::default();
        let ext2 = MockExtractor::default();
        let engine2 = CrawlEngine::new(nav2.clone(), ext2.clone(), store.clone());
        let resumed = engine2.rehydrate().await;
        assert_eq!(resumed, 1);

        let status = engine2.status(7).await.unwrap();
        assert!(status.running);
        assert_eq!(status.max_depth, 2);
        assert_eq!(status.rate_ms, 50);
        // the commit for the old in-flight visit died with the old process;
        // the visit went back to the frontier head and was re-navigated
        assert_eq!(status.visiting.unwrap().url, SEED);
        assert_eq!(status.queue_len, 1);
        assert_eq!(nav2.attempts(), vec![SEED.to_string()]);
        assert!(ext2.is_enabled(7));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_restarts_a_halted_session() {
        let (engine, nav, ext, _) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        engine
            .on_links_discovered(1, SEED, &["/docs/a".to_string()], &docs_spec())
            .await;

        // paused with the seed still in flight: its commit will never arrive
        engine.pause(1).await;
        engine.extractor.disable(1).await;
        assert!(!engine.status(1).await.unwrap().running);

        engine.resume(1).await.unwrap();
        let status = engine.status(1).await.unwrap();
        assert!(status.running);
        assert_eq!(status.reason, None);
        assert!(ext.is_enabled(1));
        // the interrupted visit went back to the frontier head and was
        // re-navigated ahead of the discovered link
        assert_eq!(status.visiting.unwrap().url, SEED);
        assert_eq!(status.queue_len, 1);
        assert_eq!(nav.attempts(), vec![SEED.to_string(), SEED.to_string()]);

        assert!(matches!(
            engine.resume(99).await,
            Err(EngineError::UnknownSession(99))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_discards_state_and_snapshot() {
        let (engine, _, ext, store) = test_engine();
        engine.start(1, SEED, docs_spec(), 2, 0).await.unwrap();
        assert!(store.load(1).unwrap().is_some());

        engine.remove_session(1).await;
        assert!(engine.status(1).await.is_none());
        assert!(store.load(1).unwrap().is_none());
        assert!(!ext.is_enabled(1));
    }
}

