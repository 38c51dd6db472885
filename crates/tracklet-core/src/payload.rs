//! Tracking payload: the JSON body the snippet POSTs to /api/track.
//!
//! Deserialization is deliberately lenient (every field optional) so that
//! validation can report *all* field errors at once instead of failing on the
//! first serde mismatch.

use serde::Deserialize;

use crate::limits::{self, sanitize_string};

pub const MAX_DIMENSION: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Pageview,
    Custom,
    Identify,
    Heartbeat,
    Payment,
}

impl EventType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pageview" => Some(Self::Pageview),
            "custom" => Some(Self::Custom),
            "identify" => Some(Self::Identify),
            "heartbeat" => Some(Self::Heartbeat),
            "payment" => Some(Self::Payment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pageview => "pageview",
            Self::Custom => "custom",
            Self::Identify => "identify",
            Self::Heartbeat => "heartbeat",
            Self::Payment => "payment",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Viewport {
    pub width: i64,
    pub height: i64,
}

/// Raw wire shape. Field names match the snippet's camelCase JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingPayload {
    pub website_id: Option<String>,
    pub domain: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub href: Option<String>,
    pub referrer: Option<String>,
    pub visitor_id: Option<String>,
    pub session_id: Option<String>,
    pub viewport: Option<Viewport>,
    pub screen_width: Option<i64>,
    pub screen_height: Option<i64>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub is_pwa: Option<bool>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub data: Option<serde_json::Value>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub transaction_id: Option<String>,
}

/// Validated and sanitized event, ready for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct TrackEvent {
    pub website_id: Option<String>,
    pub domain: String,
    pub event_type: EventType,
    pub href: String,
    pub referrer: Option<String>,
    pub visitor_id: String,
    pub session_id: String,
    pub viewport_width: Option<i64>,
    pub viewport_height: Option<i64>,
    pub screen_width: i64,
    pub screen_height: i64,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub is_pwa: bool,
    pub title: Option<String>,
    pub name: Option<String>,
    pub data: Option<serde_json::Value>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub transaction_id: Option<String>,
}

impl TrackingPayload {
    /// Validate every field, collecting one message per violation.
    ///
    /// On success the returned [`TrackEvent`] has every string field
    /// truncated to its per-field limit and stripped of control characters.
    pub fn validate(self) -> Result<TrackEvent, Vec<String>> {
        let mut errors = Vec::new();

        let required = |errors: &mut Vec<String>,
                        value: Option<String>,
                        field: &str,
                        max: usize|
         -> String {
            match value {
                Some(v) if !v.is_empty() => {
                    if v.chars().count() > max {
                        errors.push(format!("{field}: must be at most {max} characters"));
                    }
                    sanitize_string(&v, max)
                }
                _ => {
                    errors.push(format!("{field}: is required"));
                    String::new()
                }
            }
        };

        let optional = |errors: &mut Vec<String>,
                        value: Option<String>,
                        field: &str,
                        max: usize|
         -> Option<String> {
            let v = value.filter(|v| !v.is_empty())?;
            if v.chars().count() > max {
                errors.push(format!("{field}: must be at most {max} characters"));
            }
            Some(sanitize_string(&v, max))
        };

        let website_id = optional(&mut errors, self.website_id, "websiteId", limits::WEBSITE_ID);
        let domain = required(&mut errors, self.domain, "domain", limits::DOMAIN);
        let href = required(&mut errors, self.href, "href", limits::HREF);
        let visitor_id = required(&mut errors, self.visitor_id, "visitorId", limits::VISITOR_ID);
        let session_id = required(&mut errors, self.session_id, "sessionId", limits::SESSION_ID);
        let referrer = optional(&mut errors, self.referrer, "referrer", limits::REFERRER);

        let event_type = match self.event_type.as_deref() {
            None => {
                errors.push("type: is required".to_string());
                EventType::Pageview
            }
            Some(raw) => match EventType::parse(raw) {
                Some(t) => t,
                None => {
                    errors.push(
                        "type: must be one of pageview, custom, identify, heartbeat, payment"
                            .to_string(),
                    );
                    EventType::Pageview
                }
            },
        };

        let dimension = |errors: &mut Vec<String>, value: Option<i64>, field: &str| -> Option<i64> {
            let v = value?;
            if !(0..=MAX_DIMENSION).contains(&v) {
                errors.push(format!("{field}: must be between 0 and {MAX_DIMENSION}"));
                return None;
            }
            Some(v)
        };

        let (viewport_width, viewport_height) = match self.viewport {
            Some(vp) => (
                dimension(&mut errors, Some(vp.width), "viewport.width"),
                dimension(&mut errors, Some(vp.height), "viewport.height"),
            ),
            None => (None, None),
        };
        let screen_width = dimension(&mut errors, self.screen_width, "screenWidth").unwrap_or(0);
        let screen_height = dimension(&mut errors, self.screen_height, "screenHeight").unwrap_or(0);

        let amount = match self.amount {
            Some(a) if a < 0 => {
                errors.push("amount: must be a non-negative integer".to_string());
                None
            }
            None if event_type == EventType::Payment => {
                errors.push("amount: is required for payment events".to_string());
                None
            }
            other => other,
        };

        let language = optional(&mut errors, self.language, "language", limits::LANGUAGE);
        let timezone = optional(&mut errors, self.timezone, "timezone", limits::TIMEZONE);
        let browser = optional(&mut errors, self.browser, "browser", limits::BROWSER);
        let browser_version = optional(
            &mut errors,
            self.browser_version,
            "browserVersion",
            limits::BROWSER_VERSION,
        );
        let os = optional(&mut errors, self.os, "os", limits::OS);
        let os_version = optional(&mut errors, self.os_version, "osVersion", limits::OS_VERSION);
        let device_type = optional(
            &mut errors,
            self.device_type,
            "deviceType",
            limits::DEVICE_TYPE,
        );
        let title = optional(&mut errors, self.title, "title", limits::TITLE);
        let name = optional(&mut errors, self.name, "name", limits::EVENT_NAME);
        let currency = optional(&mut errors, self.currency, "currency", limits::CURRENCY);
        let transaction_id = optional(
            &mut errors,
            self.transaction_id,
            "transactionId",
            limits::TRANSACTION_ID,
        );

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(TrackEvent {
            website_id,
            domain,
            event_type,
            href,
            referrer,
            visitor_id,
            session_id,
            viewport_width,
            viewport_height,
            screen_width,
            screen_height,
            language,
            timezone,
            browser,
            browser_version,
            os,
            os_version,
            device_type,
            is_pwa: self.is_pwa.unwrap_or(false),
            title,
            name,
            data: self.data,
            amount,
            currency,
            transaction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> TrackingPayload {
        TrackingPayload {
            domain: Some("example.com".to_string()),
            event_type: Some("pageview".to_string()),
            href: Some("https://example.com/".to_string()),
            visitor_id: Some("v1".to_string()),
            session_id: Some("s1".to_string()),
            ..TrackingPayload::default()
        }
    }

    #[test]
    fn minimal_payload_validates() {
        let event = minimal().validate().unwrap();
        assert_eq!(event.event_type, EventType::Pageview);
        assert_eq!(event.domain, "example.com");
        assert!(!event.is_pwa);
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let errors = TrackingPayload::default().validate().unwrap_err();
        let joined = errors.join("\n");
        assert!(joined.contains("domain: is required"));
        assert!(joined.contains("href: is required"));
        assert!(joined.contains("visitorId: is required"));
        assert!(joined.contains("sessionId: is required"));
        assert!(joined.contains("type: is required"));
        assert!(errors.len() >= 5);
    }

    #[test]
    fn unknown_event_type_rejected() {
        let mut p = minimal();
        p.event_type = Some("clickstream".to_string());
        let errors = p.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("type:"));
    }

    #[test]
    fn out_of_range_viewport_rejected() {
        let mut p = minimal();
        p.viewport = Some(Viewport {
            width: 50_000,
            height: -2,
        });
        let errors = p.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn negative_amount_rejected() {
        let mut p = minimal();
        p.event_type = Some("payment".to_string());
        p.amount = Some(-500);
        let errors = p.validate().unwrap_err();
        assert!(errors[0].starts_with("amount:"));
    }

    #[test]
    fn control_characters_stripped_from_title() {
        let mut p = minimal();
        p.title = Some("Hello\x00 World".to_string());
        let event = p.validate().unwrap();
        assert_eq!(event.title.as_deref(), Some("Hello World"));
    }
}
