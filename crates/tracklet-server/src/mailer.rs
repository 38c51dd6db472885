//! SMTP delivery for spike notifications.

use std::time::Duration;

use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

pub fn is_valid_email(target: &str) -> bool {
    let trimmed = target.trim();
    let Some((local, domain)) = trimmed.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
}

fn smtp_noop_enabled() -> bool {
    std::env::var("TRACKLET_SMTP_NOOP")
        .ok()
        .map(|v| {
            let trimmed = v.trim();
            trimmed.eq_ignore_ascii_case("1")
                || trimmed.eq_ignore_ascii_case("true")
                || trimmed.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct Mailer;

impl Mailer {
    pub fn new() -> Self {
        Self
    }

    /// Send a plain-text email. Transport settings come from
    /// `TRACKLET_SMTP_*` environment variables; with `TRACKLET_SMTP_NOOP`
    /// set, delivery is logged and skipped.
    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        if !is_valid_email(to) {
            return Err("invalid email target".to_string());
        }
        if smtp_noop_enabled() {
            info!(
                target = %to,
                subject = %subject,
                "SMTP noop transport enabled; skipping network dispatch"
            );
            return Ok(());
        }
        let host = std::env::var("TRACKLET_SMTP_HOST")
            .map_err(|_| "smtp host is not configured".to_string())?;
        let port = std::env::var("TRACKLET_SMTP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(587);
        let from_value = std::env::var("TRACKLET_SMTP_FROM")
            .unwrap_or_else(|_| "tracklet@localhost".to_string());
        let from: Mailbox = from_value
            .parse()
            .map_err(|_| "invalid TRACKLET_SMTP_FROM".to_string())?;
        let to: Mailbox = to
            .parse()
            .map_err(|_| "invalid email target".to_string())?;
        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| format!("smtp message build failed: {e}"))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .timeout(Some(Duration::from_secs(5)));
        if let (Ok(user), Ok(pass)) = (
            std::env::var("TRACKLET_SMTP_USERNAME"),
            std::env::var("TRACKLET_SMTP_PASSWORD"),
        ) {
            builder = builder.credentials(Credentials::new(user, pass));
        }
        let transport = builder.build();
        transport
            .send(email)
            .await
            .map_err(|e| format!("smtp send failed: {e}"))?;
        Ok(())
    }
}

impl Default for Mailer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("ops@example.com"));
        assert!(is_valid_email("  ops@example.com  "));
        assert!(!is_valid_email("ops"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ops@.com"));
        assert!(!is_valid_email("ops@localhost"));
    }
}
