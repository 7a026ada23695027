//! Persistent target store over sqlite.
//!
//! One connection behind a mutex: concurrent upserts for the same
//! `(target_id, canonical_href)` serialize here, which is what keeps the
//! dedup and counter invariants honest. Every mutating operation runs in a
//! single transaction.

use crate::model::{Target, TargetCounters, TargetPatch, TargetSettings, UpsertOutcome, UrlRecord};
use rusqlite::{Connection, OptionalExtension, Row, params};
use scopewalk_engine::Kind;
use scopewalk_engine::engine::SessionId;
use scopewalk_engine::snapshot::CrawlSnapshot;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Invalid stored kind: {0}")]
    InvalidKind(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct Database {
    conn: Mutex<Connection>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn kind_column(kind: Kind) -> &'static str {
    match kind {
        Kind::Page => "page_count",
        Kind::Api => "api_count",
        Kind::Asset => "asset_count",
    }
}

impl Database {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Optimize for concurrent writers
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute_batch(
            "
            -- Crawl targets: one row per origin + scope pair, settings and
            -- counters inline
            CREATE TABLE IF NOT EXISTS targets (
    id TEXT PRIMARY KEY,
    origin TEXT NOT NULL,
    scope_path TEXT NOT NULL,

    -- settings
    ignore_hash INTEGER NOT NULL DEFAULT 1,
    exclude_assets INTEGER NOT NULL DEFAULT 1,
    normalize_query TEXT NOT NULL DEFAULT 'sort' CHECK(normalize_query IN ('sort', 'none')),
    max_urls INTEGER NOT NULL DEFAULT 1000,
    deep_mode INTEGER NOT NULL DEFAULT 0,

    -- counters, maintained in the same transaction as record writes
    total_count INTEGER NOT NULL DEFAULT 0,
    page_count INTEGER NOT NULL DEFAULT 0,
    api_count INTEGER NOT NULL DEFAULT 0,
    asset_count INTEGER NOT NULL DEFAULT 0,

    created_at INTEGER NOT NULL
);

-- Discovered URLs, one row per canonical form per target
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id TEXT NOT NULL,
    href TEXT NOT NULL,
    canonical_href TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('page', 'api', 'asset')),
    method TEXT,
    status INTEGER,
    discovered_via TEXT NOT NULL,
    ts INTEGER NOT NULL,
    source TEXT,

    FOREIGN KEY(target_id) REFERENCES targets(id) ON DELETE CASCADE,
    UNIQUE(target_id, canonical_href)
);

CREATE INDEX IF NOT EXISTS idx_urls_target ON urls(target_id);
CREATE INDEX IF NOT EXISTS idx_urls_kind ON urls(target_id, kind);

-- Durable crawl session snapshots, JSON-encoded
CREATE TABLE IF NOT EXISTS sessions (
    session_id INTEGER PRIMARY KEY,
    target_id TEXT NOT NULL,
    running INTEGER NOT NULL,
    snapshot TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_target ON sessions(target_id);
            ",
        )?;
        Ok(())
    }

    // Target management

    /// Idempotent get-or-create keyed by `Target::build_id(origin, scope)`.
    pub fn ensure_target(&self, origin: &str, scope_path: &str) -> Result<Target> {
        let id = Target::build_id(origin, scope_path);
        let scope = scopewalk_engine::url::normalize_scope(scope_path);
        let defaults = TargetSettings::default();

        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO targets (
                id, origin, scope_path, ignore_hash, exclude_assets,
                normalize_query, max_urls, deep_mode, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &id,
                origin,
                &scope,
                defaults.ignore_hash,
                defaults.exclude_assets,
                defaults.normalize_query.as_str(),
                defaults.max_urls,
                defaults.deep_mode,
                now_ms(),
            ],
        )?;
        Self::get_target_row(&conn, &id)?.ok_or(StoreError::UnknownTarget(id))
    }

    pub fn get_target(&self, target_id: &str) -> Result<Option<Target>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        Self::get_target_row(&conn, target_id)
    }

    pub fn list_targets(&self) -> Result<Vec<Target>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, origin, scope_path, ignore_hash, exclude_assets, normalize_query,
                    max_urls, deep_mode, total_count, page_count, api_count, asset_count,
                    created_at
             FROM targets ORDER BY created_at, id",
        )?;
        let targets = stmt
            .query_map([], Self::row_to_target)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    /// Shallow-merge `patch` into the target's settings. Returns `Ok(None)`
    /// when the target does not exist.
    pub fn update_target(&self, target_id: &str, patch: &TargetPatch) -> Result<Option<Target>> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let Some(target) = Self::get_target_row(&tx, target_id)? else {
            return Ok(None);
        };
        let mut settings = target.settings;
        patch.apply(&mut settings);
        tx.execute(
            "UPDATE targets SET ignore_hash = ?1, exclude_assets = ?2, normalize_query = ?3,
                    max_urls = ?4, deep_mode = ?5
             WHERE id = ?6",
            params![
                settings.ignore_hash,
                settings.exclude_assets,
                settings.normalize_query.as_str(),
                settings.max_urls,
                settings.deep_mode,
                target_id,
            ],
        )?;
        let updated = Self::get_target_row(&tx, target_id)?;
        tx.commit()?;
        Ok(updated)
    }

    // Record operations

    /// The single mutation point for stored URLs. Inserts a new record or
    /// merges into the existing one: kind only ever promotes up the
    /// api > page > asset priority order, `href`/`ts` follow the newer
    /// sighting, `discovered_via`/`source` keep the first, and the per-kind
    /// counters move in the same transaction.
    pub fn upsert_record(&self, target_id: &str, rec: &UrlRecord) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, kind FROM urls WHERE target_id = ?1 AND canonical_href = ?2",
                params![target_id, &rec.canonical_href],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO urls (
                        target_id, href, canonical_href, kind, method, status,
                        discovered_via, ts, source
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        target_id,
                        &rec.href,
                        &rec.canonical_href,
                        rec.kind.as_str(),
                        &rec.method,
                        rec.status,
                        &rec.discovered_via,
                        rec.ts,
                        &rec.source,
                    ],
                )?;
                tx.execute(
                    &format!(
                        "UPDATE targets SET total_count = total_count + 1,
                                {col} = {col} + 1
                         WHERE id = ?1",
                        col = kind_column(rec.kind)
                    ),
                    params![target_id],
                )?;
                UpsertOutcome {
                    created: true,
                    updated: false,
                }
            }
            Some((row_id, stored_kind)) => {
                let old_kind = Kind::parse(&stored_kind)
                    .ok_or_else(|| StoreError::InvalidKind(stored_kind.clone()))?;
                let new_kind = if rec.kind.priority() > old_kind.priority() {
                    rec.kind
                } else {
                    old_kind
                };
                tx.execute(
                    "UPDATE urls SET href = ?1, kind = ?2,
                            method = COALESCE(?3, method),
                            status = COALESCE(?4, status),
                            ts = ?5,
                            source = COALESCE(source, ?6)
                     WHERE id = ?7",
                    params![
                        &rec.href,
                        new_kind.as_str(),
                        &rec.method,
                        rec.status,
                        rec.ts,
                        &rec.source,
                        row_id,
                    ],
                )?;
                if new_kind != old_kind {
                    debug!(target_id, canonical = %rec.canonical_href,
                        from = old_kind.as_str(), to = new_kind.as_str(), "kind promoted");
                    tx.execute(
                        &format!(
                            "UPDATE targets SET {old} = MAX({old} - 1, 0),
                                    {new} = {new} + 1
                             WHERE id = ?1",
                            old = kind_column(old_kind),
                            new = kind_column(new_kind)
                        ),
                        params![target_id],
                    )?;
                }
                UpsertOutcome {
                    created: false,
                    updated: true,
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Stored records for a target, optionally narrowed to a kind set and a
    /// case-insensitive substring of the canonical form.
    pub fn list_records(
        &self,
        target_id: &str,
        kinds: Option<&[Kind]>,
        contains: Option<&str>,
    ) -> Result<Vec<UrlRecord>> {
        let mut sql = String::from(
            "SELECT href, canonical_href, kind, method, status, discovered_via, ts, source
             FROM urls WHERE target_id = ?1",
        );
        if let Some(kinds) = kinds {
            if kinds.is_empty() {
                return Ok(Vec::new());
            }
            let set = kinds
                .iter()
                .map(|k| format!("'{}'", k.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND kind IN ({set})"));
        }
        if contains.is_some() {
            sql.push_str(" AND instr(lower(canonical_href), lower(?2)) > 0");
        }
        sql.push_str(" ORDER BY id");

        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let map = |row: &Row<'_>| {
            let kind_str: String = row.get(2)?;
            Ok(UrlRecord {
                href: row.get(0)?,
                canonical_href: row.get(1)?,
                kind: Kind::parse(&kind_str).unwrap_or(Kind::Page),
                method: row.get(3)?,
                status: row.get(4)?,
                discovered_via: row.get(5)?,
                ts: row.get(6)?,
                source: row.get(7)?,
            })
        };
        let records = match contains {
            Some(needle) => stmt
                .query_map(params![target_id, needle], map)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map(params![target_id], map)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(records)
    }

    /// Delete every record for the target and zero its counters. The target
    /// row itself survives.
    pub fn reset_target(&self, target_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM urls WHERE target_id = ?1", params![target_id])?;
        tx.execute(
            "UPDATE targets SET total_count = 0, page_count = 0, api_count = 0, asset_count = 0
             WHERE id = ?1",
            params![target_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Level check for the limit enforcer: cap configured and total at or
    /// over it.
    pub fn limit_reached(&self, target_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let row: Option<(u32, u64)> = conn
            .query_row(
                "SELECT max_urls, total_count FROM targets WHERE id = ?1",
                params![target_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((max_urls, total)) => max_urls > 0 && total >= u64::from(max_urls),
            None => false,
        })
    }

    // Session snapshots

    pub fn save_snapshot(&self, session: SessionId, snap: &CrawlSnapshot) -> Result<()> {
        let json = serde_json::to_string(snap)?;
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO sessions (session_id, target_id, running, snapshot, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
                target_id = excluded.target_id,
                running = excluded.running,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at",
            params![session as i64, &snap.target_id, snap.running, &json, now_ms()],
        )?;
        Ok(())
    }

    pub fn load_snapshot(&self, session: SessionId) -> Result<Option<CrawlSnapshot>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM sessions WHERE session_id = ?1",
                params![session as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    pub fn remove_snapshot(&self, session: SessionId) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session as i64],
        )?;
        Ok(())
    }

    pub fn load_all_snapshots(&self) -> Result<Vec<(SessionId, CrawlSnapshot)>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare("SELECT session_id, snapshot FROM sessions")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            out.push((id as SessionId, serde_json::from_str(&json)?));
        }
        Ok(out)
    }

    // Row mapping

    fn get_target_row(conn: &Connection, target_id: &str) -> Result<Option<Target>> {
        let target = conn
            .query_row(
                "SELECT id, origin, scope_path, ignore_hash, exclude_assets, normalize_query,
                        max_urls, deep_mode, total_count, page_count, api_count, asset_count,
                        created_at
                 FROM targets WHERE id = ?1",
                params![target_id],
                Self::row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    fn row_to_target(row: &Row<'_>) -> rusqlite::Result<Target> {
        let query_str: String = row.get(5)?;
        Ok(Target {
            id: row.get(0)?,
            origin: row.get(1)?,
            scope_path: row.get(2)?,
            settings: TargetSettings {
                ignore_hash: row.get(3)?,
                exclude_assets: row.get(4)?,
                normalize_query: scopewalk_engine::url::QueryMode::parse(&query_str)
                    .unwrap_or(scopewalk_engine::url::QueryMode::Sort),
                max_urls: row.get(6)?,
                deep_mode: row.get(7)?,
            },
            counters: TargetCounters {
                total: row.get::<_, i64>(8)? as u64,
                page: row.get::<_, i64>(9)? as u64,
                api: row.get::<_, i64>(10)? as u64,
                asset: row.get::<_, i64>(11)? as u64,
            },
            created_at: row.get(12)?,
        })
    }
}
