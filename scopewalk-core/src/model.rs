//! Data model for targets and stored URL records.

use scopewalk_engine::Kind;
use scopewalk_engine::engine::TargetSpec;
use scopewalk_engine::url::{QueryMode, normalize_scope};
use serde::{Deserialize, Serialize};

/// Per-target knobs. Defaults match what a freshly observed target gets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSettings {
    pub ignore_hash: bool,
    pub exclude_assets: bool,
    pub normalize_query: QueryMode,
    /// Record cap for the limit enforcer. 0 disables the cap.
    pub max_urls: u32,
    pub deep_mode: bool,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            ignore_hash: true,
            exclude_assets: true,
            normalize_query: QueryMode::Sort,
            max_urls: 1000,
            deep_mode: false,
        }
    }
}

/// Running per-kind record counts, maintained transactionally with every
/// record write. `total` always equals the number of stored records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounters {
    pub total: u64,
    pub page: u64,
    pub api: u64,
    pub asset: u64,
}

/// An origin + path-scope pair under active cataloging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub origin: String,
    pub scope_path: String,
    pub settings: TargetSettings,
    pub counters: TargetCounters,
    pub created_at: i64,
}

impl Target {
    /// Deterministic target key: origin concatenated with the normalized
    /// scope, so `https://ex.com` + `docs` becomes `https://ex.com/docs/`.
    pub fn build_id(origin: &str, scope_path: &str) -> String {
        format!("{}{}", origin, normalize_scope(scope_path))
    }

    /// Engine-facing projection of this target.
    pub fn spec(&self) -> TargetSpec {
        TargetSpec {
            target_id: self.id.clone(),
            origin: self.origin.clone(),
            scope_path: self.scope_path.clone(),
            ignore_hash: self.settings.ignore_hash,
            normalize_query: self.settings.normalize_query,
            deep_mode: self.settings.deep_mode,
        }
    }
}

/// One stored sighting of a canonical URL within a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Last-seen absolute form.
    pub href: String,
    /// Dedup identity key.
    pub canonical_href: String,
    pub kind: Kind,
    pub method: Option<String>,
    pub status: Option<u16>,
    /// Provenance: `dom`, `mutation`, `spa-history`, `navigation`,
    /// `api-hook` or `manual`.
    pub discovered_via: String,
    /// Last-touched time, unix millis.
    pub ts: i64,
    /// Page the URL was first observed on.
    pub source: Option<String>,
}

/// Shallow settings patch for [`Target`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPatch {
    pub ignore_hash: Option<bool>,
    pub exclude_assets: Option<bool>,
    pub normalize_query: Option<QueryMode>,
    pub max_urls: Option<u32>,
    pub deep_mode: Option<bool>,
}

impl TargetPatch {
    pub fn is_empty(&self) -> bool {
        self.ignore_hash.is_none()
            && self.exclude_assets.is_none()
            && self.normalize_query.is_none()
            && self.max_urls.is_none()
            && self.deep_mode.is_none()
    }

    pub fn apply(&self, settings: &mut TargetSettings) {
        if let Some(v) = self.ignore_hash {
            settings.ignore_hash = v;
        }
        if let Some(v) = self.exclude_assets {
            settings.exclude_assets = v;
        }
        if let Some(v) = self.normalize_query {
            settings.normalize_query = v;
        }
        if let Some(v) = self.max_urls {
            settings.max_urls = v;
        }
        if let Some(v) = self.deep_mode {
            settings.deep_mode = v;
        }
    }
}

/// Result of [`crate::data::Database::upsert_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub created: bool,
    pub updated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_id_normalizes_the_scope() {
        assert_eq!(
            Target::build_id("https://ex.com", "docs"),
            "https://ex.com/docs/"
        );
        assert_eq!(Target::build_id("https://ex.com", ""), "https://ex.com/");
        assert_eq!(
            Target::build_id("https://ex.com", "/docs/"),
            "https://ex.com/docs/"
        );
    }

    #[test]
    fn default_settings() {
        let s = TargetSettings::default();
        assert!(s.ignore_hash);
        assert!(s.exclude_assets);
        assert_eq!(s.normalize_query, QueryMode::Sort);
        assert_eq!(s.max_urls, 1000);
        assert!(!s.deep_mode);
    }

    #[test]
    fn patch_merges_only_set_fields() {
        let mut settings = TargetSettings::default();
        let patch = TargetPatch {
            max_urls: Some(0),
            deep_mode: Some(true),
            ..Default::default()
        };
        patch.apply(&mut settings);
        assert_eq!(settings.max_urls, 0);
        assert!(settings.deep_mode);
        assert!(settings.ignore_hash);
        assert!(TargetPatch::default().is_empty());
    }
}
