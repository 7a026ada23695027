//! Bundled HTTP navigation driver.
//!
//! [`HttpNavigator`] implements both [`NavigationDriver`] and [`Extractor`]
//! over a plain `reqwest` client: "navigating" a session fetches the URL,
//! and extraction harvests candidate hrefs out of the response body with
//! `scraper`. It cannot observe script-driven network calls, so deep mode is
//! accepted but has no effect here.

use crate::drivers::{CrawlEvent, Extractor, NavigationDriver};
use crate::engine::SessionId;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Elements whose attribute may point at a crawlable URL.
const HARVEST_SELECTORS: &[(&str, &str)] = &[
    ("a[href]", "href"),
    ("area[href]", "href"),
    ("link[href]", "href"),
    ("form[action]", "action"),
    ("iframe[src]", "src"),
    ("img[src]", "src"),
    ("source[src]", "src"),
];

/// Session ids handed out by [`HttpNavigator::open_passive`] start here so
/// they never collide with caller-assigned ids.
const PASSIVE_SESSION_BASE: u64 = 1 << 32;

#[derive(Default)]
struct SessionCtx {
    current_url: Option<String>,
    observing: bool,
    /// Base URL and hrefs of the most recent harvest, replayed by
    /// `extract_now`.
    last_harvest: Option<(String, Vec<String>)>,
}

/// HTTP-backed driver. Cheap to clone; clones share the client, the session
/// table and the event channel.
#[derive(Clone)]
pub struct HttpNavigator {
    inner: Arc<NavigatorInner>,
}

struct NavigatorInner {
    client: Client,
    events: mpsc::Sender<CrawlEvent>,
    sessions: Mutex<HashMap<SessionId, SessionCtx>>,
    next_passive: AtomicU64,
}

impl HttpNavigator {
    pub fn new(events: mpsc::Sender<CrawlEvent>) -> Self {
        Self::with_timeout(events, 10)
    }

    pub fn with_timeout(events: mpsc::Sender<CrawlEvent>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .user_agent("Scopewalk/0.2 (https://github.com/trapdoorsec/scopewalk)")
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            inner: Arc::new(NavigatorInner {
                client,
                events,
                sessions: Mutex::new(HashMap::new()),
                next_passive: AtomicU64::new(PASSIVE_SESSION_BASE),
            }),
        }
    }

    fn with_session<R>(&self, session: SessionId, f: impl FnOnce(&mut SessionCtx) -> R) -> R {
        let mut sessions = self.inner.sessions.lock().expect("session table poisoned");
        f(sessions.entry(session).or_default())
    }

    async fn emit(&self, event: CrawlEvent) {
        if self.inner.events.send(event).await.is_err() {
            debug!("event channel closed, dropping crawl event");
        }
    }

    async fn emit_harvest(&self, session: SessionId, base_url: String, hrefs: Vec<String>) {
        self.emit(CrawlEvent::Discovered {
            session,
            base_url,
            hrefs,
            via: "dom".to_string(),
            ts: now_ms(),
        })
        .await;
    }
}

impl NavigationDriver for HttpNavigator {
    async fn current_url(&self, session: SessionId) -> Option<String> {
        self.inner
            .sessions
            .lock()
            .expect("session table poisoned")
            .get(&session)
            .and_then(|ctx| ctx.current_url.clone())
    }

    async fn navigate(&self, session: SessionId, url: String) -> bool {
        debug!(session, url = %url, "fetching");
        let response = match self.inner.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(session, url = %url, "fetch failed: {e}");
                return false;
            }
        };

        // Redirects were followed, commit at the final URL like a browser
        // address bar would.
        let final_url = response.url().to_string();
        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        let observing = self.with_session(session, |ctx| {
            ctx.current_url = Some(final_url.clone());
            ctx.observing
        });

        self.emit(CrawlEvent::Committed {
            session,
            url: final_url.clone(),
        })
        .await;

        if !(observing && is_html) {
            return true;
        }

        let hrefs = match response.text().await {
            Ok(body) => harvest_hrefs(&body),
            Err(e) => {
                warn!(session, url = %final_url, "failed to read body: {e}");
                return true;
            }
        };
        self.with_session(session, |ctx| {
            ctx.last_harvest = Some((final_url.clone(), hrefs.clone()));
        });
        self.emit_harvest(session, final_url, hrefs).await;
        true
    }

    async fn open_passive(&self, _session: SessionId, url: String) -> Option<SessionId> {
        let id = self.inner.next_passive.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, url = %url, "opening passive session");
        self.navigate(id, url).await;
        Some(id)
    }
}

impl Extractor for HttpNavigator {
    async fn enable(
        &self,
        session: SessionId,
        target_id: String,
        _scope_path: String,
        deep_mode: bool,
    ) {
        if deep_mode {
            debug!(session, target_id, "deep mode requested, HTTP driver cannot observe network calls");
        }
        self.with_session(session, |ctx| ctx.observing = true);
    }

    async fn disable(&self, session: SessionId) {
        self.with_session(session, |ctx| {
            ctx.observing = false;
            ctx.last_harvest = None;
        });
    }

    async fn extract_now(&self, session: SessionId) {
        let harvest = self.with_session(session, |ctx| {
            if ctx.observing {
                ctx.last_harvest.clone()
            } else {
                None
            }
        });
        if let Some((base_url, hrefs)) = harvest {
            self.emit_harvest(session, base_url, hrefs).await;
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Pull candidate hrefs out of an HTML document, in document order,
/// deduplicated, plus any meta-refresh redirect target.
fn harvest_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut hrefs = Vec::new();

    for (selector, attr) in HARVEST_SELECTORS {
        let sel = Selector::parse(selector).expect("static selector");
        for element in document.select(&sel) {
            if let Some(value) = element.value().attr(attr) {
                let value = value.trim();
                if value.is_empty()
                    || value.starts_with("javascript:")
                    || value.starts_with("mailto:")
                    || value.starts_with("tel:")
                    || value.starts_with("data:")
                {
                    continue;
                }
                if seen.insert(value.to_string()) {
                    hrefs.push(value.to_string());
                }
            }
        }
    }

    let meta = Selector::parse("meta[http-equiv]").expect("static selector");
    for element in document.select(&meta) {
        let is_refresh = element
            .value()
            .attr("http-equiv")
            .is_some_and(|v| v.eq_ignore_ascii_case("refresh"));
        if !is_refresh {
            continue;
        }
        if let Some(target) = element
            .value()
            .attr("content")
            .and_then(meta_refresh_target)
            && seen.insert(target.clone())
        {
            hrefs.push(target);
        }
    }

    hrefs
}

/// Parse the URL out of a meta-refresh `content` value like `"5; url=/next"`.
fn meta_refresh_target(content: &str) -> Option<String> {
    for part in content.split(';') {
        let part = part.trim();
        if let Some(rest) = part
            .get(..4)
            .filter(|p| p.eq_ignore_ascii_case("url="))
            .map(|_| &part[4..])
        {
            let target = rest.trim().trim_matches(|c| c == '\'' || c == '"');
            if !target.is_empty() {
                return Some(target.to_string());
            }
        }
    }
    None
}
