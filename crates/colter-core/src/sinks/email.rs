//! Email alerts over SMTP.
//!
//! The sink turns a cycle's alerts into at most one message. Delivery sits
//! behind the `Notifier` trait; `SmtpNotifier` uses lettre with STARTTLS.

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{DispatchBatch, Sink};
use crate::auth::SecretString;
use crate::config::SmtpConfig;
use crate::error::SinkDispatchError;
use crate::models::{Alert, AlertKind};

const SUBJECT_PREFIX: &str = "[colter]";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), SinkDispatchError>;
}

/// Plain-text mail through an SMTP relay with STARTTLS
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipient: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig<SecretString>) -> Result<Self, SinkDispatchError> {
        let sender = parse_mailbox("sender", &config.sender)?;
        let recipient = parse_mailbox("recipient", &config.recipient)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map_err(|e| SinkDispatchError::InvalidEndpoint(format!("{}: {}", config.smtp_server, e)))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.expose().to_string(),
            ))
            .build();

        Ok(Self {
            transport,
            sender,
            recipient,
        })
    }
}

fn parse_mailbox(field: &str, value: &str) -> Result<Mailbox, SinkDispatchError> {
    value
        .parse()
        .map_err(|e| SinkDispatchError::InvalidEndpoint(format!("smtp.{} '{}': {}", field, value, e)))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), SinkDispatchError> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(self.recipient.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| SinkDispatchError::Email(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| SinkDispatchError::Email(e.to_string()))?;
        debug!(subject, "Email sent");
        Ok(())
    }
}

pub struct EmailSink<N> {
    notifier: N,
}

impl<N: Notifier> EmailSink<N> {
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }
}

fn kind_label(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::OpenIssue => "Open issue",
        AlertKind::CollectionFailure => "Collection failure",
        AlertKind::Test => "Test",
    }
}

/// Build the subject and body of the alert digest, grouped by entity in
/// first-seen order. `None` when there is nothing to report.
pub fn compose(alerts: &[Alert]) -> Option<(String, String)> {
    if alerts.is_empty() {
        return None;
    }

    let mut entities: Vec<(&str, Vec<&Alert>)> = Vec::new();
    for alert in alerts {
        match entities.iter_mut().find(|(id, _)| *id == alert.entity_id) {
            Some((_, group)) => group.push(alert),
            None => entities.push((alert.entity_id.as_str(), vec![alert])),
        }
    }

    let subject = if alerts.iter().all(|a| a.kind == AlertKind::Test) {
        format!("{} Test alert", SUBJECT_PREFIX)
    } else {
        format!(
            "{} {} alert{} for {} entit{}",
            SUBJECT_PREFIX,
            alerts.len(),
            if alerts.len() == 1 { "" } else { "s" },
            entities.len(),
            if entities.len() == 1 { "y" } else { "ies" }
        )
    };

    let mut body = format!(
        "Colter alert report ({})\n",
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    );
    for (entity, group) in entities {
        body.push('\n');
        body.push_str(entity);
        body.push('\n');
        for alert in group {
            body.push_str(&format!("  - {}: {}\n", kind_label(alert.kind), alert.title));
        }
    }

    Some((subject, body))
}

#[async_trait]
impl<N: Notifier> Sink for EmailSink<N> {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, batch: &DispatchBatch) -> Result<usize, SinkDispatchError> {
        match compose(&batch.alerts) {
            Some((subject, body)) => {
                self.notifier.send(&subject, &body).await?;
                Ok(1)
            }
            None => {
                debug!("No alerts, skipping email");
                Ok(0)
            }
        }
    }

    fn preview(&self, batch: &DispatchBatch) -> String {
        match compose(&batch.alerts) {
            Some((subject, body)) => format!("Subject: {}\n\n{}", subject, body),
            None => "No alerts to send".to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Captures messages instead of sending them
    #[derive(Clone, Default)]
    pub(crate) struct CapturingNotifier {
        pub sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn send(&self, subject: &str, body: &str) -> Result<(), SinkDispatchError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_compose_groups_by_entity() {
        let alerts = vec![
            Alert::open_issue("octo/a", "Crash on start"),
            Alert::open_issue("octo/b", "Typo in docs"),
            Alert::open_issue("octo/a", "Slow build"),
        ];
        let (subject, body) = compose(&alerts).unwrap();
        assert_eq!(subject, "[colter] 3 alerts for 2 entities");

        let a = body.find("octo/a").unwrap();
        let b = body.find("octo/b").unwrap();
        let slow = body.find("Slow build").unwrap();
        assert!(a < slow && slow < b);
    }

    #[test]
    fn test_compose_test_alert() {
        let (subject, body) = compose(&[Alert::test()]).unwrap();
        assert_eq!(subject, "[colter] Test alert");
        assert!(body.contains("This is a test issue for email alert."));
    }

    #[test]
    fn test_compose_nothing() {
        assert!(compose(&[]).is_none());
    }

    #[tokio::test]
    async fn test_sink_sends_one_message() {
        let notifier = CapturingNotifier::default();
        let sink = EmailSink::new(notifier.clone());
        let batch = DispatchBatch::new(
            Vec::new(),
            vec![
                Alert::open_issue("octo/a", "Crash on start"),
                Alert::collection_failure("widgets", "Not found"),
            ],
        );

        assert_eq!(sink.send(&batch).await.unwrap(), 1);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Collection failure: Not found"));
    }

    #[tokio::test]
    async fn test_sink_without_alerts_sends_nothing() {
        let notifier = CapturingNotifier::default();
        let sink = EmailSink::new(notifier.clone());
        assert_eq!(sink.send(&DispatchBatch::default()).await.unwrap(), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_smtp_notifier_rejects_bad_address() {
        let config = SmtpConfig {
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: "alerts".to_string(),
            password: SecretString::new("pw"),
            sender: "not an address".to_string(),
            recipient: "me@example.com".to_string(),
        };
        assert!(matches!(
            SmtpNotifier::new(&config),
            Err(SinkDispatchError::InvalidEndpoint(_))
        ));
    }
}
