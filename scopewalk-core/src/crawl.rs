//! One-shot crawl orchestration.
//!
//! Wires the HTTP navigator, the crawl engine, the target store and the
//! durable session snapshots together, and pumps driver events into the
//! ingest pipeline until the session leaves `Running`.

use crate::data::Database;
use crate::ingest::{ingest_api_call, ingest_links, ingest_navigation};
use crate::limits::enforce_limit;
use crate::model::TargetCounters;
use crate::sessions::SessionStore;
use scopewalk_engine::drivers::CrawlEvent;
use scopewalk_engine::engine::{CrawlEngine, CrawlStatus, SessionId, StopReason};
use scopewalk_engine::fetch::HttpNavigator;
use scopewalk_engine::url::get_origin;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

/// Engine wired to the bundled HTTP driver and sqlite snapshots.
pub type HttpCrawlEngine = CrawlEngine<HttpNavigator, HttpNavigator, SessionStore>;

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub seed_url: String,
    /// Scope path under the seed's origin. Defaults to the whole origin.
    pub scope_path: Option<String>,
    pub max_depth: u32,
    pub rate_ms: u64,
    pub timeout_secs: u64,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            seed_url: String::new(),
            scope_path: None,
            max_depth: 2,
            rate_ms: 0,
            timeout_secs: 10,
        }
    }
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(CrawlStatus) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub target_id: String,
    pub visited: u64,
    pub counters: TargetCounters,
    pub reason: Option<StopReason>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// First session id above every persisted snapshot, so a new crawl never
/// overwrites a snapshot kept for a later resume.
fn next_session_id(db: &Database) -> crate::data::Result<SessionId> {
    let max = db
        .load_all_snapshots()?
        .iter()
        .map(|(id, _)| *id)
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

/// Execute a crawl with the given options and return a summary of what was
/// cataloged.
pub async fn execute_crawl(
    db: Arc<Database>,
    options: CrawlOptions,
    progress: Option<CrawlProgressCallback>,
) -> anyhow::Result<CrawlSummary> {
    let origin = get_origin(&options.seed_url)
        .ok_or_else(|| anyhow::anyhow!("invalid seed URL: {}", options.seed_url))?;
    let scope = options.scope_path.as_deref().unwrap_or("/");
    let target = db.ensure_target(&origin, scope)?;
    let session = next_session_id(&db)?;
    info!(target_id = %target.id, seed = %options.seed_url, session, "starting crawl");

    let (events_tx, mut events) = mpsc::channel(256);
    let nav = HttpNavigator::with_timeout(events_tx, options.timeout_secs);
    let engine = CrawlEngine::new(nav.clone(), nav, SessionStore::new(db.clone()));

    let (running_tx, mut running_rx) = tokio::sync::watch::channel(true);
    engine.set_status_callback(Arc::new(move |_session, status| {
        if let Some(status) = status {
            if let Some(cb) = &progress {
                cb(status.clone());
            }
            let _ = running_tx.send(status.running);
        }
    }));

    engine
        .start(
            session,
            &options.seed_url,
            target.spec(),
            options.max_depth,
            options.rate_ms,
        )
        .await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&db, &engine, event).await?,
                None => break,
            },
            changed = running_rx.changed() => {
                if changed.is_err() || !*running_rx.borrow() {
                    break;
                }
            }
        }
    }
    // late events from the final page still count
    while let Ok(event) = events.try_recv() {
        handle_event(&db, &engine, event).await?;
    }

    let status = engine.status(session).await;
    let (visited, reason) = status.map(|s| (s.visited, s.reason)).unwrap_or((0, None));
    if reason.is_none() {
        // natural completion leaves nothing to resume
        engine.remove_session(session).await;
    }
    let counters = db
        .get_target(&target.id)?
        .map(|t| t.counters)
        .unwrap_or_default();
    info!(target_id = %target.id, visited, total = counters.total, "crawl finished");

    Ok(CrawlSummary {
        target_id: target.id,
        visited,
        counters,
        reason,
    })
}

/// Pick up the crawls a previous process left behind: rehydrate every
/// persisted session, restart limit-paused ones whose cap is no longer
/// reached, and pump driver events until no session is running. Returns how
/// many sessions went back to work.
pub async fn resume_crawls(
    db: Arc<Database>,
    progress: Option<CrawlProgressCallback>,
) -> anyhow::Result<usize> {
    let (events_tx, mut events) = mpsc::channel(256);
    let nav = HttpNavigator::new(events_tx);
    let engine = CrawlEngine::new(nav.clone(), nav, SessionStore::new(db.clone()));

    let (idle_tx, mut idle_rx) = tokio::sync::watch::channel(false);
    let active: Arc<Mutex<HashSet<SessionId>>> = Arc::new(Mutex::new(HashSet::new()));
    {
        let active = active.clone();
        engine.set_status_callback(Arc::new(move |session, status| {
            let mut active = active.lock().expect("session set poisoned");
            match &status {
                Some(s) if s.running => {
                    active.insert(session);
                }
                _ => {
                    active.remove(&session);
                }
            }
            if let (Some(s), Some(cb)) = (&status, &progress) {
                cb(s.clone());
            }
            let _ = idle_tx.send(active.is_empty());
        }));
    }

    let snapshots = db.load_all_snapshots()?;
    let mut resumed = engine.rehydrate().await;
    for (session, snap) in &snapshots {
        if snap.reason == Some(StopReason::Limit) && !db.limit_reached(&snap.target_id)? {
            info!(session, target_id = %snap.target_id, "record cap raised, resuming");
            engine.resume(*session).await?;
            resumed += 1;
        }
    }
    if resumed == 0 {
        return Ok(0);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&db, &engine, event).await?,
                None => break,
            },
            changed = idle_rx.changed() => {
                if changed.is_err() || *idle_rx.borrow() {
                    break;
                }
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        handle_event(&db, &engine, event).await?;
    }

    for (session, _) in snapshots {
        if let Some(status) = engine.status(session).await
            && !status.running
            && status.reason.is_none()
        {
            engine.remove_session(session).await;
        }
    }
    Ok(resumed)
}

async fn handle_event(
    db: &Database,
    engine: &HttpCrawlEngine,
    event: CrawlEvent,
) -> anyhow::Result<()> {
    let session = match &event {
        CrawlEvent::Committed { session, .. }
        | CrawlEvent::Discovered { session, .. }
        | CrawlEvent::ApiObserved { session, .. } => *session,
    };
    // Sessions report their own target; re-read it on every event so live
    // settings changes apply.
    let Some(status) = engine.status(session).await else {
        return Ok(());
    };
    let Some(target) = db.get_target(&status.target_id)? else {
        return Ok(());
    };
    match event {
        CrawlEvent::Committed { session, url } => {
            ingest_navigation(db, &target, &url, now_ms())?;
            enforce_limit(db, engine, &target.id).await?;
            engine.on_navigation_committed(session, &url).await;
        }
        CrawlEvent::Discovered {
            session,
            base_url,
            hrefs,
            via,
            ts,
        } => {
            ingest_links(db, &target, &base_url, &hrefs, &via, ts)?;
            enforce_limit(db, engine, &target.id).await?;
            engine
                .on_links_discovered(session, &base_url, &hrefs, &target.spec())
                .await;
        }
        CrawlEvent::ApiObserved {
            url,
            method,
            status,
            base_url,
            ts,
            ..
        } => {
            ingest_api_call(db, &target, &url, &method, status, &base_url, ts)?;
            enforce_limit(db, engine, &target.id).await?;
        }
    }
    Ok(())
}
