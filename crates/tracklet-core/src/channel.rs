//! Marketing-channel classification.
//!
//! Pure heuristic mapping (referrer, utm_source, utm_medium) -> channel
//! label, applied post-hoc over grouped session rows by the aggregation
//! layer. All comparisons are case-insensitive; labels are capitalized.

use url::Url;

use crate::urls::{is_internal_referrer, strip_www};

pub const SEARCH_ENGINES: &[&str] = &[
    "google",
    "bing",
    "duckduckgo",
    "yahoo",
    "yandex",
    "baidu",
    "ecosia",
    "brave",
    "startpage",
    "qwant",
    "kagi",
];

pub const SOCIAL_NETWORKS: &[&str] = &[
    "facebook",
    "instagram",
    "twitter",
    "x.com",
    "tiktok",
    "linkedin",
    "pinterest",
    "reddit",
    "youtube",
    "snapchat",
    "whatsapp",
    "telegram",
    "discord",
    "github",
    "mastodon",
    "threads",
    "bluesky",
];

/// Shorthand utm_source values seen in the wild.
const SOCIAL_SOURCE_ALIASES: &[(&str, &str)] = &[
    ("ig", "instagram"),
    ("fb", "facebook"),
    ("tw", "twitter"),
    ("x", "x.com"),
    ("tt", "tiktok"),
    ("li", "linkedin"),
    ("pi", "pinterest"),
    ("rd", "reddit"),
    ("yt", "youtube"),
    ("sc", "snapchat"),
    ("wa", "whatsapp"),
    ("tg", "telegram"),
    ("dc", "discord"),
    ("gh", "github"),
];

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn resolve_social_source(source: &str) -> Option<&'static str> {
    if let Some((_, resolved)) = SOCIAL_SOURCE_ALIASES.iter().find(|(alias, _)| *alias == source) {
        return Some(resolved);
    }
    SOCIAL_NETWORKS
        .iter()
        .find(|s| source.contains(*s) || s.contains(source))
        .copied()
}

/// Classify a session into a marketing channel. First match wins:
/// UTM hints, then direct/internal detection, then referrer hostname.
pub fn classify_channel(
    referrer: Option<&str>,
    utm_source: Option<&str>,
    utm_medium: Option<&str>,
) -> String {
    let source = utm_source.unwrap_or("").to_lowercase();
    let medium = utm_medium.unwrap_or("").to_lowercase();

    if utm_source.is_some_and(|s| !s.is_empty()) || utm_medium.is_some_and(|m| !m.is_empty()) {
        if medium == "email" || source.contains("email") || source.contains("mail") {
            return "Email".to_string();
        }
        if medium == "paid" || medium == "cpc" || medium == "ppc" || source.contains("ads") {
            return "Paid".to_string();
        }

        if medium == "social" {
            return match resolve_social_source(&source) {
                Some(social) => capitalize(social),
                None => "Social".to_string(),
            };
        }

        if !source.is_empty() {
            if let Some(social) = resolve_social_source(&source) {
                return capitalize(social);
            }
        }

        let search = SEARCH_ENGINES
            .iter()
            .find(|e| !source.is_empty() && (source.contains(*e) || e.contains(source.as_str())));
        if medium == "organic" || search.is_some() {
            return match search {
                Some(engine) => capitalize(engine),
                None => "Organic Search".to_string(),
            };
        }
        if medium == "referral" || medium == "affiliate" {
            return "Referral".to_string();
        }
    }

    let Some(referrer) = referrer.filter(|r| !r.is_empty()) else {
        return "Direct".to_string();
    };
    if is_internal_referrer(referrer) {
        return "Direct".to_string();
    }

    let Some(hostname) = Url::parse(referrer)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    else {
        return "Direct".to_string();
    };
    let hostname = strip_www(&hostname);

    if let Some(social) = SOCIAL_NETWORKS.iter().find(|s| hostname.contains(*s)) {
        return capitalize(social);
    }
    if let Some(engine) = SEARCH_ENGINES.iter().find(|e| hostname.contains(*e)) {
        return capitalize(engine);
    }

    "Referral".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_medium_wins() {
        assert_eq!(
            classify_channel(None, Some("newsletter"), Some("email")),
            "Email"
        );
        assert_eq!(classify_channel(None, Some("mailchimp"), None), "Email");
    }

    #[test]
    fn paid_mediums() {
        assert_eq!(classify_channel(None, Some("google"), Some("cpc")), "Paid");
        assert_eq!(classify_channel(None, Some("fb-ads"), None), "Paid");
    }

    #[test]
    fn social_medium_resolves_alias() {
        assert_eq!(
            classify_channel(None, Some("ig"), Some("social")),
            "Instagram"
        );
        assert_eq!(
            classify_channel(None, Some("unknown-app"), Some("social")),
            "Social"
        );
    }

    #[test]
    fn organic_search_from_source() {
        assert_eq!(classify_channel(None, Some("google"), None), "Google");
        assert_eq!(
            classify_channel(None, Some("some-engine"), Some("organic")),
            "Organic Search"
        );
    }

    #[test]
    fn referral_medium() {
        assert_eq!(
            classify_channel(None, Some("partnersite"), Some("affiliate")),
            "Referral"
        );
    }

    #[test]
    fn absent_referrer_is_direct() {
        assert_eq!(classify_channel(None, None, None), "Direct");
        assert_eq!(classify_channel(Some(""), None, None), "Direct");
    }

    #[test]
    fn internal_referrer_is_direct() {
        assert_eq!(
            classify_channel(Some("http://localhost:5173/dev"), None, None),
            "Direct"
        );
    }

    #[test]
    fn referrer_hostname_matches_social() {
        assert_eq!(
            classify_channel(Some("https://twitter.com/someone/status/1"), None, None),
            "Twitter"
        );
        assert_eq!(
            classify_channel(Some("https://www.reddit.com/r/rust"), None, None),
            "Reddit"
        );
    }

    #[test]
    fn referrer_hostname_matches_search_engine() {
        assert_eq!(
            classify_channel(Some("https://google.com/search?q=x"), None, None),
            "Google"
        );
    }

    #[test]
    fn interior_www_does_not_collapse_the_hostname() {
        // Deleting every "www." would turn this into "google" and
        // misclassify it as organic search.
        assert_eq!(
            classify_channel(Some("https://goowww.gle/path"), None, None),
            "Referral"
        );
    }

    #[test]
    fn unknown_referrer_is_referral() {
        assert_eq!(
            classify_channel(Some("https://blog.example.org/post"), None, None),
            "Referral"
        );
    }

    #[test]
    fn unparsable_referrer_is_direct() {
        assert_eq!(classify_channel(Some("::::"), None, None), "Direct");
    }
}
