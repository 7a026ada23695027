//! URL normalization: absolute resolution, canonical identity form, origins.
//!
//! Canonicalization is best-effort by design: anything that fails to parse is
//! returned unchanged so a bad link never aborts a discovery batch.

use serde::{Deserialize, Serialize};
use url::Url;

/// How query strings are treated during canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Reorder parameters lexicographically by key, then value.
    Sort,
    /// Leave the query string untouched.
    None,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Sort => "sort",
            QueryMode::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sort" => Some(QueryMode::Sort),
            "none" => Some(QueryMode::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalOpts {
    pub ignore_hash: bool,
    pub query: QueryMode,
    pub strip_index_html: bool,
}

impl Default for CanonicalOpts {
    fn default() -> Self {
        Self {
            ignore_hash: true,
            query: QueryMode::Sort,
            strip_index_html: true,
        }
    }
}

/// Resolve `reference` against `base`, keeping only http(s) results.
/// Returns `None` for empty input, unparsable URLs and foreign schemes
/// (`javascript:`, `mailto:`, `tel:` and friends all fall out here).
pub fn to_absolute(reference: &str, base: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let resolved = match Url::parse(base) {
        Ok(b) => b.join(reference).ok()?,
        Err(_) => Url::parse(reference).ok()?,
    };
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Produce the canonical string identity of a URL.
///
/// Lowercases the host and drops default ports (both courtesy of the parser),
/// strips credentials, collapses repeated path separators, optionally strips a
/// trailing `index.html|htm|php` segment, sorts query parameters and clears
/// the fragment. Unparsable input comes back verbatim.
pub fn canonicalize(href: &str, opts: CanonicalOpts) -> String {
    let Ok(mut u) = Url::parse(href) else {
        return href.to_string();
    };

    let _ = u.set_username("");
    let _ = u.set_password(None);

    let mut path = u.path().to_string();
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if opts.strip_index_html {
        let lower = path.to_ascii_lowercase();
        for suffix in ["/index.html", "/index.htm", "/index.php"] {
            if lower.ends_with(suffix) {
                // keep the trailing slash of the parent directory
                path.truncate(path.len() - (suffix.len() - 1));
                break;
            }
        }
    }
    u.set_path(&path);

    if opts.query == QueryMode::Sort
        && let Some(q) = u.query()
        && !q.is_empty()
    {
        let mut pairs: Vec<(String, String)> = u
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            u.set_query(None);
        } else {
            pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            u.query_pairs_mut()
                .clear()
                .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    if opts.ignore_hash {
        u.set_fragment(None);
    }

    u.to_string()
}

/// `scheme://host[:port]` of a URL, with default ports omitted.
pub fn get_origin(href: &str) -> Option<String> {
    let u = Url::parse(href).ok()?;
    let host = u.host_str()?;
    match u.port() {
        Some(port) => Some(format!("{}://{}:{}", u.scheme(), host, port)),
        None => Some(format!("{}://{}", u.scheme(), host)),
    }
}

/// Normalize a scope path so it always begins and ends with `/`.
pub fn normalize_scope(scope: &str) -> String {
    let p = scope.trim();
    if p.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(p.len() + 2);
    if !p.starts_with('/') {
        out.push('/');
    }
    out.push_str(p);
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(href: &str) -> String {
        canonicalize(href, CanonicalOpts::default())
    }

    #[test]
    fn absolute_resolution_against_base() {
        let abs = to_absolute("/docs/a", "https://ex.com/docs/").unwrap();
        assert_eq!(abs, "https://ex.com/docs/a");

        let abs = to_absolute("b.html", "https://ex.com/docs/a/").unwrap();
        assert_eq!(abs, "https://ex.com/docs/a/b.html");
    }

    #[test]
    fn absolute_rejects_foreign_schemes() {
        assert!(to_absolute("javascript:void(0)", "https://ex.com/").is_none());
        assert!(to_absolute("mailto:x@ex.com", "https://ex.com/").is_none());
        assert!(to_absolute("ftp://ex.com/file", "https://ex.com/").is_none());
        assert!(to_absolute("", "https://ex.com/").is_none());
        assert!(to_absolute("   ", "https://ex.com/").is_none());
    }

    #[test]
    fn absolute_without_valid_base() {
        assert_eq!(
            to_absolute("https://ex.com/x", "not a url").unwrap(),
            "https://ex.com/x"
        );
        assert!(to_absolute("/relative", "not a url").is_none());
    }

    #[test]
    fn canonical_lowercases_host_and_drops_default_port() {
        assert_eq!(canon("https://EX.com:443/A"), "https://ex.com/A");
        assert_eq!(canon("http://Ex.Com:80/"), "http://ex.com/");
        assert_eq!(canon("http://ex.com:8080/"), "http://ex.com:8080/");
    }

    #[test]
    fn canonical_strips_credentials() {
        assert_eq!(canon("https://user:pw@ex.com/p"), "https://ex.com/p");
    }

    #[test]
    fn canonical_collapses_duplicate_slashes() {
        assert_eq!(canon("https://ex.com//a///b"), "https://ex.com/a/b");
    }

    #[test]
    fn canonical_strips_index_files() {
        assert_eq!(canon("https://ex.com/a/index.html"), "https://ex.com/a/");
        assert_eq!(canon("https://ex.com/a/INDEX.HTM"), "https://ex.com/a/");
        assert_eq!(canon("https://ex.com/index.php"), "https://ex.com/");
        // not a directory index, keep it
        assert_eq!(
            canon("https://ex.com/reindex.html"),
            "https://ex.com/reindex.html"
        );
    }

    #[test]
    fn canonical_sorts_query_parameters() {
        assert_eq!(
            canon("https://ex.com/p?b=2&a=1"),
            canon("https://ex.com/p?a=1&b=2")
        );
        assert_eq!(canon("https://ex.com/p?b=2&a=1"), "https://ex.com/p?a=1&b=2");
        // repeated keys keep their multiplicity, values tie-break
        assert_eq!(
            canon("https://ex.com/p?a=2&a=1"),
            "https://ex.com/p?a=1&a=2"
        );
    }

    #[test]
    fn canonical_respects_query_mode_none() {
        let opts = CanonicalOpts {
            query: QueryMode::None,
            ..CanonicalOpts::default()
        };
        assert_eq!(
            canonicalize("https://ex.com/p?b=2&a=1", opts),
            "https://ex.com/p?b=2&a=1"
        );
    }

    #[test]
    fn canonical_clears_fragment_when_asked() {
        assert_eq!(canon("https://ex.com/p#section"), "https://ex.com/p");
        let opts = CanonicalOpts {
            ignore_hash: false,
            ..CanonicalOpts::default()
        };
        assert_eq!(
            canonicalize("https://ex.com/p#section", opts),
            "https://ex.com/p#section"
        );
    }

    #[test]
    fn canonical_is_idempotent() {
        let inputs = [
            "https://EX.com:443//a//index.html?b=2&a=1#frag",
            "http://user:pw@ex.com:80/x/y/?z=%20space&a=1",
            "https://ex.com/p?a=1&a=2&b=+",
        ];
        for href in inputs {
            let once = canon(href);
            assert_eq!(canon(&once), once, "not idempotent for {href}");
        }
    }

    #[test]
    fn canonical_passes_through_garbage() {
        assert_eq!(canon("not a url"), "not a url");
    }

    #[test]
    fn origin_of() {
        assert_eq!(
            get_origin("https://ex.com/a/b?q=1").unwrap(),
            "https://ex.com"
        );
        assert_eq!(
            get_origin("http://ex.com:8080/x").unwrap(),
            "http://ex.com:8080"
        );
        assert_eq!(get_origin("https://ex.com:443/").unwrap(), "https://ex.com");
        assert!(get_origin("nope").is_none());
    }

    #[test]
    fn scope_normalization() {
        assert_eq!(normalize_scope("/"), "/");
        assert_eq!(normalize_scope(""), "/");
        assert_eq!(normalize_scope("docs"), "/docs/");
        assert_eq!(normalize_scope("/docs"), "/docs/");
        assert_eq!(normalize_scope("/docs/"), "/docs/");
        assert_eq!(normalize_scope("  /docs  "), "/docs/");
    }
}
