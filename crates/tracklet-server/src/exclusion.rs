//! Per-website privacy exclusion rules.
//!
//! Rules are checked in order IP, path, country; the first match wins and
//! the event is acknowledged without being stored.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;

use tracklet_duckdb::website::Website;

/// Why an event was excluded, for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    Ip,
    Path,
    Country,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::Ip => "ip",
            ExclusionReason::Path => "path",
            ExclusionReason::Country => "country",
        }
    }
}

/// A single IP rule: exact address, per-octet `*` wildcard ("10.0.*.*"),
/// or IPv4 CIDR ("10.0.0.0/8").
fn ip_rule_matches(rule: &str, ip: &str) -> bool {
    let rule = rule.trim();
    if rule.is_empty() {
        return false;
    }
    if rule == ip {
        return true;
    }
    if rule.contains('/') {
        let Ok(net) = rule.parse::<Ipv4Net>() else {
            return false;
        };
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return false;
        };
        return match addr {
            IpAddr::V4(v4) => net.contains(&v4),
            IpAddr::V6(_) => false,
        };
    }
    if rule.contains('*') {
        let Ok(addr) = ip.parse::<Ipv4Addr>() else {
            return false;
        };
        let rule_octets: Vec<&str> = rule.split('.').collect();
        if rule_octets.len() != 4 {
            return false;
        }
        let octets = addr.octets();
        return rule_octets.iter().zip(octets.iter()).all(|(pat, octet)| {
            *pat == "*" || pat.parse::<u8>().map(|p| p == *octet).unwrap_or(false)
        });
    }
    false
}

/// Anchored glob match where `*` spans any run of non-slash characters.
/// "/admin/*" matches "/admin/users" but not "/admin/users/1".
fn glob_matches(pattern: &[char], path: &[char]) -> bool {
    match (pattern.first(), path.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some('*'), _) => {
            // Match zero characters, or consume one non-slash and retry.
            if glob_matches(&pattern[1..], path) {
                return true;
            }
            match path.first() {
                Some(&c) if c != '/' => glob_matches(pattern, &path[1..]),
                _ => false,
            }
        }
        (Some(&p), Some(&c)) if p == c => glob_matches(&pattern[1..], &path[1..]),
        _ => false,
    }
}

fn path_rule_matches(rule: &str, pathname: &str) -> bool {
    let rule = rule.trim();
    if rule.is_empty() {
        return false;
    }
    let pattern: Vec<char> = rule.chars().collect();
    let path: Vec<char> = pathname.chars().collect();
    glob_matches(&pattern, &path)
}

/// Evaluate a website's exclusion rules against the request.
pub fn should_exclude(
    site: &Website,
    ip: Option<&str>,
    pathname: Option<&str>,
    country: Option<&str>,
) -> Option<ExclusionReason> {
    if let Some(ip) = ip {
        if site.excluded_ips.iter().any(|rule| ip_rule_matches(rule, ip)) {
            return Some(ExclusionReason::Ip);
        }
    }
    if let Some(pathname) = pathname {
        if site
            .excluded_paths
            .iter()
            .any(|rule| path_rule_matches(rule, pathname))
        {
            return Some(ExclusionReason::Path);
        }
    }
    if let Some(country) = country {
        if site
            .excluded_countries
            .iter()
            .any(|rule| rule.trim().eq_ignore_ascii_case(country))
        {
            return Some(ExclusionReason::Country);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(ips: &[&str], paths: &[&str], countries: &[&str]) -> Website {
        let mut w = Website::default();
        w.excluded_ips = ips.iter().map(|s| s.to_string()).collect();
        w.excluded_paths = paths.iter().map(|s| s.to_string()).collect();
        w.excluded_countries = countries.iter().map(|s| s.to_string()).collect();
        w
    }

    #[test]
    fn exact_ip_match() {
        let w = site(&["203.0.113.5"], &[], &[]);
        assert_eq!(
            should_exclude(&w, Some("203.0.113.5"), None, None),
            Some(ExclusionReason::Ip)
        );
        assert_eq!(should_exclude(&w, Some("203.0.113.6"), None, None), None);
    }

    #[test]
    fn wildcard_octets_match() {
        let w = site(&["10.0.*.*"], &[], &[]);
        assert_eq!(
            should_exclude(&w, Some("10.0.3.7"), None, None),
            Some(ExclusionReason::Ip)
        );
        assert_eq!(should_exclude(&w, Some("10.1.3.7"), None, None), None);
    }

    #[test]
    fn cidr_match() {
        let w = site(&["192.0.2.0/24"], &[], &[]);
        assert_eq!(
            should_exclude(&w, Some("192.0.2.200"), None, None),
            Some(ExclusionReason::Ip)
        );
        assert_eq!(should_exclude(&w, Some("192.0.3.1"), None, None), None);
        // IPv6 clients never match an IPv4 CIDR rule.
        assert_eq!(should_exclude(&w, Some("2001:db8::1"), None, None), None);
    }

    #[test]
    fn path_glob_stays_within_segment() {
        let w = site(&[], &["/admin/*"], &[]);
        assert_eq!(
            should_exclude(&w, None, Some("/admin/users"), None),
            Some(ExclusionReason::Path)
        );
        assert_eq!(should_exclude(&w, None, Some("/admin/users/1"), None), None);
        assert_eq!(should_exclude(&w, None, Some("/blog"), None), None);
    }

    #[test]
    fn exact_path_and_mid_pattern_glob() {
        let w = site(&[], &["/health", "/api/*/status"], &[]);
        assert_eq!(
            should_exclude(&w, None, Some("/health"), None),
            Some(ExclusionReason::Path)
        );
        assert_eq!(
            should_exclude(&w, None, Some("/api/v2/status"), None),
            Some(ExclusionReason::Path)
        );
        assert_eq!(should_exclude(&w, None, Some("/healthz"), None), None);
    }

    #[test]
    fn country_is_case_insensitive() {
        let w = site(&[], &[], &["de"]);
        assert_eq!(
            should_exclude(&w, None, None, Some("DE")),
            Some(ExclusionReason::Country)
        );
        assert_eq!(should_exclude(&w, None, None, Some("FR")), None);
    }

    #[test]
    fn ip_rules_win_over_later_rule_kinds() {
        let w = site(&["203.0.113.5"], &["/x"], &["DE"]);
        assert_eq!(
            should_exclude(&w, Some("203.0.113.5"), Some("/x"), Some("DE")),
            Some(ExclusionReason::Ip)
        );
    }
}
