//! Alert fan-out to the configured notification channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use printwatch_shared::config::NotifyConfig;
use printwatch_shared::{AlertChannel, CollaboratorError, Notifier};

/// Sends each alert to every enabled channel. Delivery failures are logged
/// and never reach the caller.
#[derive(Clone)]
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    email: bool,
    chat: bool,
    subject: String,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: &NotifyConfig, timeout: Duration) -> Self {
        Self {
            notifier,
            email: config.enable_email,
            chat: config.enable_chat,
            subject: config.email_subject.clone(),
            timeout,
        }
    }

    pub fn is_enabled(&self, channel: AlertChannel) -> bool {
        match channel {
            AlertChannel::Email => self.email,
            AlertChannel::Chat => self.chat,
        }
    }

    /// Raise an error alert on all enabled channels.
    pub async fn alert(&self, message: &str) {
        if self.email {
            self.notify(AlertChannel::Email, message).await;
        }
        if self.chat {
            self.notify(AlertChannel::Chat, &format!("{}: {}", self.subject, message)).await;
        }
    }

    /// Send on one channel, if it is enabled.
    pub async fn notify(&self, channel: AlertChannel, message: &str) {
        if !self.is_enabled(channel) {
            tracing::debug!("{:?} notifications disabled, dropping: {}", channel, message);
            return;
        }
        let sent = match tokio::time::timeout(self.timeout, self.notifier.notify(channel, message)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(self.timeout)),
        };
        if let Err(e) = sent {
            tracing::error!("Failed to send {:?} notification: {}", channel, e);
        }
    }
}

/// Notifier that writes notifications to the log. Stands in for the email
/// and chat transports.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    email_recipients: Vec<String>,
    chat_recipients: Vec<String>,
    subject: String,
}

impl LogNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            email_recipients: config.email_recipients.clone(),
            chat_recipients: config.chat_recipients.clone(),
            subject: config.email_subject.clone(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: AlertChannel, message: &str) -> Result<(), CollaboratorError> {
        match channel {
            AlertChannel::Email => tracing::warn!(
                recipients = ?self.email_recipients,
                subject = %self.subject,
                "Email: {}",
                message
            ),
            AlertChannel::Chat => tracing::warn!(recipients = ?self.chat_recipients, "Chat: {}", message),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(AlertChannel, String)>>,
        fail_email: bool,
    }

    #[async_trait]
    impl Notifier for Outbox {
        async fn notify(&self, channel: AlertChannel, message: &str) -> Result<(), CollaboratorError> {
            self.sent.lock().unwrap().push((channel, message.to_string()));
            if self.fail_email && channel == AlertChannel::Email {
                return Err(CollaboratorError::Unavailable("smtp down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fan_out_respects_toggles() {
        let outbox = Arc::new(Outbox::default());
        let config = NotifyConfig { enable_chat: false, ..NotifyConfig::default() };
        let dispatcher = AlertDispatcher::new(outbox.clone(), &config, Duration::from_secs(1));
        dispatcher.alert("Nozzle too hot").await;
        dispatcher.notify(AlertChannel::Chat, "The print has finished").await;
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(*sent, vec![(AlertChannel::Email, "Nozzle too hot".to_string())]);
    }

    #[tokio::test]
    async fn test_chat_alert_carries_subject_and_survives_email_failure() {
        let outbox = Arc::new(Outbox { fail_email: true, ..Outbox::default() });
        let dispatcher = AlertDispatcher::new(outbox.clone(), &NotifyConfig::default(), Duration::from_secs(1));
        dispatcher.alert("Head out of bounds").await;
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], (AlertChannel::Chat, "Print Error Alert: Head out of bounds".to_string()));
    }
}
