/// Member notifications
///
/// Notifications are strictly best-effort: a delivery failure or timeout
/// is logged and swallowed, never propagated into the money path. Every
/// send goes through [`send_best_effort`], which enforces the configured
/// timeout.
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use susu_shared::config::NotifyConfig;

/// One notification to a set of member email addresses
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub recipients: Vec<String>,
    #[serde(flatten)]
    pub template: NoticeTemplate,
}

/// What the notification says
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum NoticeTemplate {
    /// A cycle started and charges were issued
    CycleStarted {
        group_id: Uuid,
        cycle_number: i32,
        amount: Decimal,
    },

    /// A member's contribution failed; a retry is booked
    PaymentRetryScheduled {
        group_id: Uuid,
        cycle_number: i32,
        retry_count: i32,
    },

    /// A member's contribution failed for the last time
    PaymentFailedFinal {
        group_id: Uuid,
        cycle_number: i32,
    },

    /// The group was paused
    GroupPaused { group_id: Uuid, reason: String },

    /// The group was resumed by an admin
    GroupResumed { group_id: Uuid },

    /// The pooled payout went out to this cycle's payee
    PayoutSent {
        group_id: Uuid,
        cycle_number: i32,
        amount: Decimal,
    },
}

impl NoticeTemplate {
    /// Template name for logging
    pub fn name(&self) -> &'static str {
        match self {
            NoticeTemplate::CycleStarted { .. } => "cycle_started",
            NoticeTemplate::PaymentRetryScheduled { .. } => "payment_retry_scheduled",
            NoticeTemplate::PaymentFailedFinal { .. } => "payment_failed_final",
            NoticeTemplate::GroupPaused { .. } => "group_paused",
            NoticeTemplate::GroupResumed { .. } => "group_resumed",
            NoticeTemplate::PayoutSent { .. } => "payout_sent",
        }
    }
}

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(#[from] reqwest::Error),

    #[error("Delivery endpoint returned {0}")]
    BadStatus(u16),
}

/// Outbound notification capability
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Sends a notice, bounding it by the configured timeout
///
/// Failures are logged at warn and dropped.
pub async fn send_best_effort(notifier: &dyn Notifier, config: &NotifyConfig, notice: Notice) {
    let timeout = Duration::from_secs(config.timeout_secs);

    match tokio::time::timeout(timeout, notifier.send(&notice)).await {
        Ok(Ok(())) => {
            debug!(
                template = notice.template.name(),
                recipients = notice.recipients.len(),
                "Notification sent"
            );
        }
        Ok(Err(err)) => {
            warn!(
                template = notice.template.name(),
                error = %err,
                "Notification delivery failed, continuing"
            );
        }
        Err(_) => {
            warn!(
                template = notice.template.name(),
                timeout_secs = config.timeout_secs,
                "Notification timed out, continuing"
            );
        }
    }
}

/// Posts notices as JSON to a configured webhook endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(notice).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::BadStatus(response.status().as_u16()))
        }
    }
}

/// Logs notices instead of delivering them
///
/// Default when no webhook endpoint is configured.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        debug!(
            template = notice.template.name(),
            recipients = ?notice.recipients,
            "Notification (logging only)"
        );
        Ok(())
    }
}

/// Builds the notifier the config asks for
pub fn notifier_from_config(config: &NotifyConfig) -> Box<dyn Notifier> {
    match &config.webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(url.clone())),
        None => Box::new(LoggingNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier {
        sent: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _notice: &Notice) -> Result<(), NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::BadStatus(500))
            } else {
                Ok(())
            }
        }
    }

    fn notice() -> Notice {
        Notice {
            recipients: vec!["member@example.com".to_string()],
            template: NoticeTemplate::CycleStarted {
                group_id: Uuid::new_v4(),
                cycle_number: 1,
                amount: dec!(100.00),
            },
        }
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        let sent = Arc::new(AtomicUsize::new(0));
        let notifier = CountingNotifier {
            sent: sent.clone(),
            fail: true,
        };
        let config = NotifyConfig::default();

        // Must not panic or propagate
        send_best_effort(&notifier, &config, notice()).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_best_effort_delivers() {
        let sent = Arc::new(AtomicUsize::new(0));
        let notifier = CountingNotifier {
            sent: sent.clone(),
            fail: false,
        };
        let config = NotifyConfig::default();

        send_best_effort(&notifier, &config, notice()).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notice_serialization_flattens_template() {
        let json = serde_json::to_value(notice()).unwrap();
        assert_eq!(json["template"], "cycle_started");
        assert!(json["recipients"].is_array());
    }
}
