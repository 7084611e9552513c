pub mod detector;
pub mod payload_catalog;

use url::Url;

use crate::errors::ProbeError;

/// Parses an operator-supplied target, prefixing `http://` when the scheme
/// is missing.
pub fn normalize_target(raw: &str) -> Result<Url, ProbeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProbeError::InvalidTarget(raw.to_string()));
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let url = Url::parse(&with_scheme).map_err(|_| ProbeError::InvalidTarget(raw.to_string()))?;
    if url.host_str().is_none() {
        return Err(ProbeError::InvalidTarget(raw.to_string()));
    }
    Ok(url)
}

/// Lower-cased host of a URL, the unit of crawl scope.
pub fn host_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_ascii_lowercase())
}

/// Resolves `href` against `base` into a crawlable absolute URL without
/// fragment. Non-http(s) links yield `None`.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target_adds_scheme() {
        assert_eq!(normalize_target("www.example.com").unwrap().as_str(), "http://www.example.com/");
        assert_eq!(
            normalize_target("https://example.com/login").unwrap().as_str(),
            "https://example.com/login"
        );
        assert!(normalize_target("   ").is_err());
        assert!(normalize_target("http://").is_err());
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://x.test/a/b").unwrap();
        assert_eq!(resolve_link(&base, "c?id=5#top").unwrap().as_str(), "https://x.test/a/c?id=5");
        assert_eq!(resolve_link(&base, "/item?id=5").unwrap().as_str(), "https://x.test/item?id=5");
        assert!(resolve_link(&base, "mailto:a@x.test").is_none());
        assert!(resolve_link(&base, "javascript:void(0)").is_none());
        assert!(resolve_link(&base, "").is_none());
    }

    #[test]
    fn test_host_of_is_case_insensitive() {
        let url = Url::parse("http://X.Test:8080/").unwrap();
        assert_eq!(host_of(&url).as_deref(), Some("x.test"));
    }
}
