//! Discovery ingest pipeline: raw sightings in, deduplicated records out.
//!
//! Each href runs resolve → scope check → canonicalize → classify →
//! asset filter → upsert. Individual links that fail any step contribute
//! nothing; a crawl over many pages has to tolerate a high rate of malformed
//! or irrelevant links without aborting.

use crate::data::{Database, Result};
use crate::model::{Target, UrlRecord};
use scopewalk_engine::Kind;
use scopewalk_engine::classify::{classify_kind, in_scope};
use scopewalk_engine::url::{canonicalize, to_absolute};
use tracing::{debug, warn};

/// Store a batch of harvested hrefs observed on `base_url`. Returns how many
/// records were newly created.
pub fn ingest_links(
    db: &Database,
    target: &Target,
    base_url: &str,
    hrefs: &[String],
    via: &str,
    ts: i64,
) -> Result<usize> {
    let opts = target.spec().canonical_opts();
    let mut created = 0usize;
    for raw in hrefs {
        let Some(abs) = to_absolute(raw, base_url) else {
            continue;
        };
        if !in_scope(&target.origin, &target.scope_path, &abs) {
            continue;
        }
        let canonical = canonicalize(&abs, opts);
        let kind = classify_kind(&canonical);
        if kind == Kind::Asset && target.settings.exclude_assets {
            continue;
        }
        let rec = UrlRecord {
            href: abs,
            canonical_href: canonical,
            kind,
            method: None,
            status: None,
            discovered_via: via.to_string(),
            ts,
            source: Some(base_url.to_string()),
        };
        match db.upsert_record(&target.id, &rec) {
            Ok(outcome) if outcome.created => created += 1,
            Ok(_) => {}
            Err(e) => warn!(target_id = %target.id, href = %rec.href, "upsert failed: {e}"),
        }
    }
    debug!(target_id = %target.id, created, total = hrefs.len(), via, "ingested link batch");
    Ok(created)
}

/// Store a committed navigation as a sighting of the page itself.
pub fn ingest_navigation(db: &Database, target: &Target, url: &str, ts: i64) -> Result<usize> {
    ingest_links(db, target, url, &[url.to_string()], "navigation", ts)
}

/// Store an intercepted network call (deep mode). Kind is forced to `api`
/// regardless of what the path heuristics would say.
pub fn ingest_api_call(
    db: &Database,
    target: &Target,
    url: &str,
    method: &str,
    status: Option<u16>,
    base_url: &str,
    ts: i64,
) -> Result<usize> {
    let Some(abs) = to_absolute(url, base_url) else {
        return Ok(0);
    };
    if !in_scope(&target.origin, &target.scope_path, &abs) {
        return Ok(0);
    }
    let canonical = canonicalize(&abs, target.spec().canonical_opts());
    let rec = UrlRecord {
        href: abs,
        canonical_href: canonical,
        kind: Kind::Api,
        method: Some(method.to_string()),
        status,
        discovered_via: "api-hook".to_string(),
        ts,
        source: Some(base_url.to_string()),
    };
    let outcome = db.upsert_record(&target.id, &rec)?;
    Ok(usize::from(outcome.created))
}
