//! Canonical URL normalization.
//!
//! The cache and dedup key is the canonical form of a post URL, so the
//! rules live in one place: adapters build canonical URLs only through
//! this module, and the cache normalizes every key on the way in. Mirror
//! domains, scheme variants and tracking query strings must collapse to
//! one key before lookup.

use reqwest::Url;

/// Query parameters that identify a post and survive normalization.
const KEPT_QUERY_PARAMS: &[&str] = &["v"];

/// Host prefixes that serve the same content as the bare domain.
const MIRROR_PREFIXES: &[&str] = &["www.", "m.", "old.", "new."];

/// Normalize a URL to its canonical form.
///
/// Rules: https scheme, lowercase host with mirror prefixes stripped,
/// fragment dropped, query dropped except identifying parameters, no
/// trailing slash. Inputs that do not parse as URLs are returned
/// unchanged so a malformed key can never panic the cache path.
#[must_use]
pub fn canonicalize(raw: &str) -> String {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let Ok(mut url) = Url::parse(&with_scheme) else {
        return raw.to_string();
    };
    if url.scheme() == "http" && url.set_scheme("https").is_err() {
        return raw.to_string();
    }

    if let Some(host) = url.host_str() {
        let lowered = host.to_ascii_lowercase();
        let stripped = MIRROR_PREFIXES
            .iter()
            .find_map(|p| lowered.strip_prefix(p))
            .unwrap_or(&lowered)
            .to_string();
        if url.set_host(Some(&stripped)).is_err() {
            return raw.to_string();
        }
    }

    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| KEPT_QUERY_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_query(None);
    if !kept.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
    }

    let mut out = url.to_string();
    while out.ends_with('/') && !out.ends_with("://") {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_mirror_collapse() {
        assert_eq!(
            canonicalize("http://www.tiktok.com/@user/video/42/"),
            "https://tiktok.com/@user/video/42"
        );
        assert_eq!(
            canonicalize("https://old.reddit.com/r/rust/comments/abc"),
            "https://reddit.com/r/rust/comments/abc"
        );
    }

    #[test]
    fn test_query_dropped_except_identifying_params() {
        assert_eq!(
            canonicalize("https://twitter.com/i/status/1?s=20&t=xyz"),
            "https://twitter.com/i/status/1"
        );
        assert_eq!(
            canonicalize("https://youtube.com/watch?v=abc123&feature=share"),
            "https://youtube.com/watch?v=abc123"
        );
    }

    #[test]
    fn test_idempotent() {
        let once = canonicalize("HTTP://WWW.Instagram.com/reel/CqQGB-1ISIw/?igshid=1");
        assert_eq!(canonicalize(&once), once);
        assert_eq!(once, "https://instagram.com/reel/CqQGB-1ISIw");
    }

    #[test]
    fn test_scheme_less_input() {
        assert_eq!(canonicalize("redd.it/2gmzqe"), "https://redd.it/2gmzqe");
    }

    #[test]
    fn test_unparseable_input_passes_through() {
        assert_eq!(canonicalize("not a url"), "not a url");
    }
}
