//! Collaborator contracts consumed by the crawl engine.
//!
//! The engine never talks to a network or a page directly. Navigation and
//! link extraction are behind these traits so the same state machine drives a
//! real browser, the bundled HTTP fetcher or a test double. Driver
//! implementations report what happened on a session through [`CrawlEvent`]s
//! pushed into an mpsc channel owned by the orchestrator.

use crate::engine::SessionId;
use std::future::Future;

/// Moves a browsing session between URLs.
///
/// `navigate` must not panic or error on failure, only signal it: the engine
/// treats a `false` as a transient fault and retries the same frontier head
/// after its pacing delay.
pub trait NavigationDriver: Send + Sync + 'static {
    /// URL the session currently points at, if known.
    fn current_url(&self, session: SessionId) -> impl Future<Output = Option<String>> + Send;

    /// Drive the session to `url`. Returns whether navigation was accepted.
    fn navigate(&self, session: SessionId, url: String) -> impl Future<Output = bool> + Send;

    /// Open `url` in a fresh session without taking focus away from the
    /// current one. Returns the new session id if the driver supports it.
    fn open_passive(
        &self,
        session: SessionId,
        url: String,
    ) -> impl Future<Output = Option<SessionId>> + Send;
}

/// Harvests candidate hyperlinks from whatever the session is showing.
pub trait Extractor: Send + Sync + 'static {
    /// Begin observing a session for a target. `deep_mode` additionally
    /// enables network-call observation where the implementation can do it.
    fn enable(
        &self,
        session: SessionId,
        target_id: String,
        scope_path: String,
        deep_mode: bool,
    ) -> impl Future<Output = ()> + Send;

    fn disable(&self, session: SessionId) -> impl Future<Output = ()> + Send;

    /// Force an immediate harvest instead of waiting for the next batch.
    fn extract_now(&self, session: SessionId) -> impl Future<Output = ()> + Send;
}

/// Events emitted by driver implementations.
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// Main-frame navigation (or same-document history change) committed.
    Committed { session: SessionId, url: String },
    /// A batch of raw hrefs harvested from the page at `base_url`.
    Discovered {
        session: SessionId,
        base_url: String,
        hrefs: Vec<String>,
        via: String,
        ts: i64,
    },
    /// An intercepted network call (deep mode only).
    ApiObserved {
        session: SessionId,
        url: String,
        method: String,
        status: Option<u16>,
        base_url: String,
        ts: i64,
    },
}
