//! Plain-text report delivery over SMTP with STARTTLS.

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use swr_shared::{Config, Result, SMTP_PASSWORD_ENV, SwrError};
use tracing::{info, instrument};

use crate::report::Report;

fn mail_error(msg: impl Into<String>) -> SwrError {
    SwrError::stage("report", msg)
}

fn mailbox(addr: &str, role: &str) -> Result<Mailbox> {
    addr.parse()
        .map_err(|e| mail_error(format!("invalid {role} address '{addr}': {e}")))
}

/// Build the message for every configured receiver.
pub fn build_message(config: &Config, report: &Report) -> Result<Message> {
    let email = &config.email;
    if email.from_addr.is_empty() {
        return Err(mail_error("no sender configured (email.from)"));
    }
    if email.to.is_empty() {
        return Err(mail_error("no receivers configured; add one with `swr receiver add`"));
    }

    let mut builder = Message::builder()
        .from(mailbox(&email.from_addr, "sender")?)
        .subject(report.subject.as_str())
        .header(ContentType::TEXT_PLAIN);
    for to in &email.to {
        builder = builder.to(mailbox(to, "receiver")?);
    }

    builder
        .body(report.body.clone())
        .map_err(|e| mail_error(format!("failed to build message: {e}")))
}

/// Send `report` to every receiver through the configured SMTP relay.
#[instrument(skip_all, fields(host = %config.email.smtp_host, receivers = config.email.to.len()))]
pub fn send(config: &Config, report: &Report) -> Result<()> {
    let message = build_message(config, report)?;
    let password = config.smtp_password().ok_or_else(|| {
        mail_error(format!("no SMTP password; set {SMTP_PASSWORD_ENV}"))
    })?;

    let transport = SmtpTransport::starttls_relay(&config.email.smtp_host)
        .map_err(|e| mail_error(format!("SMTP relay {}: {e}", config.email.smtp_host)))?
        .port(config.email.smtp_port)
        .credentials(Credentials::new(config.smtp_user().to_string(), password))
        .build();

    transport
        .send(&message)
        .map_err(|e| mail_error(format!("SMTP send failed: {e}")))?;

    info!("report mailed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Report {
        Report {
            subject: "Weekly｜2026/02/18 – 2026/02/25".into(),
            body: "Summary\n".into(),
        }
    }

    #[test]
    fn message_addresses_every_receiver() {
        let mut config = Config::default();
        config.email.from_addr = "bot@example.com".into();
        config.email.to = vec!["a@example.com".into(), "b@example.com".into()];

        let message = build_message(&config, &report()).expect("build");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("From: bot@example.com"));
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn missing_addresses_are_stage_errors() {
        let mut config = Config::default();
        config.email.to = vec!["a@example.com".into()];
        assert!(matches!(build_message(&config, &report()), Err(SwrError::Stage { .. })));

        config.email.from_addr = "bot@example.com".into();
        config.email.to.clear();
        assert!(matches!(build_message(&config, &report()), Err(SwrError::Stage { .. })));
    }
}
