//! URL helpers shared by the ingestion pipeline and the aggregation layer.

use url::Url;

/// UTM attribution extracted from the page URL (and referrer as fallback).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtmParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn utm_from_url(url: &Url) -> UtmParams {
    UtmParams {
        source: query_param(url, "utm_source"),
        medium: query_param(url, "utm_medium"),
        campaign: query_param(url, "utm_campaign"),
    }
}

/// Read `utm_source`/`utm_medium`/`utm_campaign` from the page URL, falling
/// back per-field to the referrer URL's query string. Page-URL values win.
pub fn extract_utm_params(href: &str, referrer: Option<&str>) -> UtmParams {
    let referrer_utm = referrer
        .and_then(|r| Url::parse(r).ok())
        .map(|u| utm_from_url(&u))
        .unwrap_or_default();

    match Url::parse(href) {
        Ok(page) => {
            let mut utm = utm_from_url(&page);
            // The original tracker only consults the referrer when the page
            // itself carries no utm_source.
            if utm.source.is_none() {
                utm.source = referrer_utm.source;
                utm.medium = utm.medium.or(referrer_utm.medium);
                utm.campaign = utm.campaign.or(referrer_utm.campaign);
            }
            utm
        }
        Err(_) => referrer_utm,
    }
}

/// Pathname of a page URL. Unparsable input degrades to the query-stripped
/// string, capped at 255 characters.
pub fn extract_pathname(href: &str) -> String {
    match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => {
            let stripped: String = href
                .split('?')
                .next()
                .unwrap_or("")
                .chars()
                .take(255)
                .collect();
            if stripped.is_empty() {
                "/".to_string()
            } else {
                stripped
            }
        }
    }
}

/// Strip one leading `www.` label from a hostname. Interior occurrences
/// stay, so `foo.www.example.com` is not rewritten.
pub fn strip_www(hostname: &str) -> &str {
    hostname.strip_prefix("www.").unwrap_or(hostname)
}

/// Canonical comparison form of a hostname: lowercase, `www.` stripped,
/// port stripped.
pub fn normalize_domain(domain: &str) -> String {
    let lower = domain.to_lowercase();
    let stripped = strip_www(&lower);
    stripped
        .split(':')
        .next()
        .unwrap_or(stripped)
        .to_string()
}

/// Recognized local-development hosts, exempt from the domain-match check.
pub fn is_local_domain(normalized: &str) -> bool {
    normalized == "localhost" || normalized == "127.0.0.1" || normalized.ends_with(".localhost")
}

/// True when the referrer points at local/internal infrastructure rather
/// than a real external source.
pub fn is_internal_referrer(referrer: &str) -> bool {
    let Ok(url) = Url::parse(referrer) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    host == "localhost"
        || host == "127.0.0.1"
        || host == "::1"
        || host == "[::1]"
        || host.ends_with(".local")
        || host.ends_with(".localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utm_read_from_page_url() {
        let utm = extract_utm_params(
            "https://example.com/?utm_source=newsletter&utm_medium=email&utm_campaign=launch",
            None,
        );
        assert_eq!(utm.source.as_deref(), Some("newsletter"));
        assert_eq!(utm.medium.as_deref(), Some("email"));
        assert_eq!(utm.campaign.as_deref(), Some("launch"));
    }

    #[test]
    fn utm_falls_back_to_referrer_when_page_has_none() {
        let utm = extract_utm_params(
            "https://example.com/pricing",
            Some("https://other.com/?utm_source=partner&utm_medium=referral"),
        );
        assert_eq!(utm.source.as_deref(), Some("partner"));
        assert_eq!(utm.medium.as_deref(), Some("referral"));
        assert_eq!(utm.campaign, None);
    }

    #[test]
    fn page_utm_wins_over_referrer() {
        let utm = extract_utm_params(
            "https://example.com/?utm_source=page",
            Some("https://other.com/?utm_source=ref&utm_medium=ref"),
        );
        assert_eq!(utm.source.as_deref(), Some("page"));
        // Referrer medium is not consulted once the page supplies a source.
        assert_eq!(utm.medium, None);
    }

    #[test]
    fn pathname_from_valid_url() {
        assert_eq!(extract_pathname("https://example.com/a/b?q=1"), "/a/b");
    }

    #[test]
    fn pathname_from_garbage_strips_query() {
        assert_eq!(extract_pathname("not a url?x=1"), "not a url");
        assert_eq!(extract_pathname("?x=1"), "/");
    }

    #[test]
    fn www_stripping_is_prefix_only() {
        assert_eq!(strip_www("www.example.com"), "example.com");
        assert_eq!(strip_www("foo.www.example.com"), "foo.www.example.com");
        assert_eq!(strip_www("example.com"), "example.com");
    }

    #[test]
    fn domain_normalization() {
        assert_eq!(normalize_domain("WWW.Example.COM:8080"), "example.com");
        assert_eq!(normalize_domain("app.example.com"), "app.example.com");
    }

    #[test]
    fn local_domains_recognized() {
        assert!(is_local_domain("localhost"));
        assert!(is_local_domain("dev.localhost"));
        assert!(is_local_domain("127.0.0.1"));
        assert!(!is_local_domain("example.com"));
    }

    #[test]
    fn internal_referrers_recognized() {
        assert!(is_internal_referrer("http://localhost:3000/page"));
        assert!(is_internal_referrer("https://dashboard.local/"));
        assert!(!is_internal_referrer("https://news.ycombinator.com/"));
        assert!(!is_internal_referrer("garbage"));
    }
}
