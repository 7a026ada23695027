//! URL kind classification and scope membership.

use crate::url::{get_origin, normalize_scope};
use serde::{Deserialize, Serialize};
use url::Url;

/// File extensions treated as static assets.
const ASSET_EXT: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "css", "map", "woff", "woff2",
    "ttf", "otf", "eot", "mp4", "webm", "mp3", "wav", "ogg", "avi", "mov", "pdf", "zip", "rar",
    "7z", "gz", "bz2", "dmg", "exe", "msi",
];

/// Classification of a discovered URL. Only `Page` expands the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Page,
    Api,
    Asset,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Page => "page",
            Kind::Api => "api",
            Kind::Asset => "asset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Kind::Page),
            "api" => Some(Kind::Api),
            "asset" => Some(Kind::Asset),
            _ => None,
        }
    }

    /// Merge priority: a record's kind only ever moves up this order.
    pub fn priority(&self) -> u8 {
        match self {
            Kind::Api => 3,
            Kind::Page => 2,
            Kind::Asset => 1,
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assign a kind from extension and path heuristics. Pure string function;
/// unparsable input counts as a page.
pub fn classify_kind(href: &str) -> Kind {
    let Ok(u) = Url::parse(href) else {
        return Kind::Page;
    };
    let path = u.path().to_ascii_lowercase();
    if let Some(idx) = path.rfind('.') {
        let ext = &path[idx + 1..];
        if !ext.contains('/') && ASSET_EXT.contains(&ext) {
            return Kind::Asset;
        }
    }
    if path.contains("/api/") || path.ends_with(".json") {
        return Kind::Api;
    }
    Kind::Page
}

/// True iff `href` shares the target origin and its path sits under the
/// normalized scope prefix.
pub fn in_scope(origin: &str, scope_path: &str, href: &str) -> bool {
    let Ok(u) = Url::parse(href) else {
        return false;
    };
    let Some(href_origin) = get_origin(u.as_str()) else {
        return false;
    };
    let Some(target_origin) = get_origin(&format!("{origin}/")) else {
        return false;
    };
    if href_origin != target_origin {
        return false;
    }
    u.path().starts_with(&normalize_scope(scope_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_assets_by_extension() {
        assert_eq!(classify_kind("https://ex.com/logo.png"), Kind::Asset);
        assert_eq!(classify_kind("https://ex.com/app.CSS"), Kind::Asset);
        assert_eq!(classify_kind("https://ex.com/font.woff2"), Kind::Asset);
        assert_eq!(classify_kind("https://ex.com/archive.tar.gz"), Kind::Asset);
    }

    #[test]
    fn classifies_api_by_path_segment_or_json() {
        assert_eq!(classify_kind("https://ex.com/api/v1/users"), Kind::Api);
        assert_eq!(classify_kind("https://ex.com/data.json"), Kind::Api);
        assert_eq!(classify_kind("https://ex.com/apiary"), Kind::Page);
    }

    #[test]
    fn everything_else_is_a_page() {
        assert_eq!(classify_kind("https://ex.com/"), Kind::Page);
        assert_eq!(classify_kind("https://ex.com/docs/guide"), Kind::Page);
        // dot in a parent segment does not make an extension
        assert_eq!(classify_kind("https://ex.com/v1.2/about"), Kind::Page);
        assert_eq!(classify_kind("not a url"), Kind::Page);
    }

    #[test]
    fn kind_priority_order() {
        assert!(Kind::Api.priority() > Kind::Page.priority());
        assert!(Kind::Page.priority() > Kind::Asset.priority());
    }

    #[test]
    fn scope_membership() {
        assert!(in_scope("https://ex.com", "/docs/", "https://ex.com/docs/x"));
        assert!(in_scope("https://ex.com", "/docs", "https://ex.com/docs/x"));
        assert!(!in_scope("https://ex.com", "/docs/", "https://ex.com/blog/x"));
        assert!(!in_scope("https://ex.com", "/docs/", "https://other.com/docs/x"));
        assert!(!in_scope("https://ex.com", "/docs/", "http://ex.com/docs/x"));
        assert!(in_scope("https://EX.com", "/", "https://ex.com/anything"));
        assert!(!in_scope("https://ex.com", "/", "garbage"));
    }
}
