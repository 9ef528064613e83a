//! Site-URL normalization (§4.3.1).

use url::Url;

pub struct Normalized {
    pub url: Option<String>,
    pub pending_reason: Option<&'static str>,
}

fn is_localhost_like(host: &str) -> bool {
    host == "localhost"
        || host == "127.0.0.1"
        || host == "::1"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.starts_with("127.")
}

pub fn normalize_site_url(raw: Option<&str>) -> Normalized {
    let raw = match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => {
            return Normalized {
                url: None,
                pending_reason: Some("pending_url_missing"),
            }
        }
    };

    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => {
            return Normalized {
                url: None,
                pending_reason: Some("pending_url_invalid"),
            }
        }
    };

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Normalized {
            url: None,
            pending_reason: Some("pending_url_invalid_protocol"),
        };
    }

    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => {
            return Normalized {
                url: None,
                pending_reason: Some("pending_url_invalid"),
            }
        }
    };

    if host == "example.com" {
        return Normalized {
            url: None,
            pending_reason: Some("pending_url_default_example"),
        };
    }

    if is_localhost_like(&host) {
        return Normalized {
            url: None,
            pending_reason: Some("pending_url_localhost"),
        };
    }

    Normalized {
        url: Some(format!("{scheme}://{host}")),
        pending_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_is_pending() {
        let n = normalize_site_url(None);
        assert_eq!(n.pending_reason, Some("pending_url_missing"));
        assert!(n.url.is_none());
    }

    #[test]
    fn unparseable_url_is_pending() {
        let n = normalize_site_url(Some("not a url"));
        assert_eq!(n.pending_reason, Some("pending_url_invalid"));
    }

    #[test]
    fn non_http_scheme_is_pending() {
        let n = normalize_site_url(Some("ftp://site.test"));
        assert_eq!(n.pending_reason, Some("pending_url_invalid_protocol"));
    }

    #[test]
    fn example_com_is_pending() {
        let n = normalize_site_url(Some("https://example.com/whatever"));
        assert_eq!(n.pending_reason, Some("pending_url_default_example"));
    }

    #[test]
    fn localhost_variants_are_pending() {
        for url in [
            "http://localhost:3000",
            "http://127.0.0.1",
            "http://sub.localhost",
            "http://box.local",
            "http://127.5.5.5",
        ] {
            let n = normalize_site_url(Some(url));
            assert_eq!(n.pending_reason, Some("pending_url_localhost"), "{url}");
        }
    }

    #[test]
    fn real_url_normalizes_to_origin_only() {
        let n = normalize_site_url(Some("https://Site.Test/some/path?x=1"));
        assert_eq!(n.pending_reason, None);
        assert_eq!(n.url.as_deref(), Some("https://site.test"));
    }
}
