//! Per-field maximum lengths applied when sanitizing incoming payloads.

pub const WEBSITE_ID: usize = 64;
pub const DOMAIN: usize = 255;
pub const HREF: usize = 2048;
pub const REFERRER: usize = 2048;
pub const VISITOR_ID: usize = 64;
pub const SESSION_ID: usize = 64;
pub const LANGUAGE: usize = 35;
pub const TIMEZONE: usize = 100;
pub const BROWSER: usize = 50;
pub const BROWSER_VERSION: usize = 50;
pub const OS: usize = 50;
pub const OS_VERSION: usize = 50;
pub const DEVICE_TYPE: usize = 20;
pub const TITLE: usize = 512;
pub const EVENT_NAME: usize = 255;
pub const CURRENCY: usize = 8;
pub const TRANSACTION_ID: usize = 255;
pub const FILTER_VALUE: usize = 255;

/// Truncate to `max` characters and strip ASCII control characters.
pub fn sanitize_string(value: &str, max: usize) -> String {
    value
        .chars()
        .take(max)
        .filter(|c| !c.is_ascii_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_truncates_and_strips_controls() {
        assert_eq!(sanitize_string("ab\x00cd\x1fe\x7ff", 100), "abcdef");
        assert_eq!(sanitize_string("abcdef", 3), "abc");
    }

    #[test]
    fn sanitize_keeps_unicode() {
        assert_eq!(sanitize_string("héllo wörld", 100), "héllo wörld");
    }
}
