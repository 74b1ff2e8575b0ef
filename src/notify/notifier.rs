//! Escalation events and the notifier that sends them.

use std::sync::Arc;

use chrono::Duration;
use log::{info, warn};

use super::{LogTransport, Message, NotificationTransport};
use crate::domain::JobKey;

/// Threshold crossings worth telling a human about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A key used up its attempt budget
    ItemExhausted { key: JobKey, attempts: u32, limit: u32 },
    /// The global run limit was reached and approval is required
    GlobalLimitReached {
        total_runs: u64,
        limit: u64,
        /// How long a new approval grant lasts
        approval: Duration,
    },
}

impl Notification {
    pub fn subject(&self) -> String {
        match self {
            Notification::ItemExhausted { key, .. } => format!("[prsweep] {} exhausted its attempts", key),
            Notification::GlobalLimitReached { .. } => "[prsweep] global run limit reached".to_string(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::ItemExhausted { key, attempts, limit } => format!(
                "Pull request {} failed {} of {} allowed attempts and will not be retried.\n\
                 It becomes eligible again only after a recorded success and cooldown.\n\n\
                 To record a manual fix: prsweep record '{}' success\n",
                key, attempts, limit, key
            ),
            Notification::GlobalLimitReached {
                total_runs,
                limit,
                approval,
            } => format!(
                "prsweep has started {} jobs, reaching the global limit of {}.\n\
                 No further items will be processed until approval is granted.\n\n\
                 To continue for {}: prsweep approve <your-name>\n",
                total_runs,
                limit,
                describe_duration(*approval)
            ),
        }
    }
}

fn describe_duration(d: Duration) -> String {
    let minutes = d.num_minutes();
    match minutes {
        60 => "1 hour".to_string(),
        m if m % 60 == 0 => format!("{} hours", m / 60),
        1 => "1 minute".to_string(),
        m => format!("{} minutes", m),
    }
}

/// Sends notifications to a single configured recipient.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn NotificationTransport>,
    recipient: Option<String>,
    from: String,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("recipient", &self.recipient)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn new(transport: Arc<dyn NotificationTransport>, recipient: Option<String>, from: impl Into<String>) -> Self {
        Self {
            transport,
            recipient,
            from: from.into(),
        }
    }

    /// Notifier that only writes to the log.
    pub fn log_only() -> Self {
        Self::new(Arc::new(LogTransport), None, "prsweep")
    }

    /// Send `notification`; errors are logged and swallowed.
    pub async fn notify(&self, notification: &Notification) {
        let message = Message {
            to: self.recipient.clone().unwrap_or_default(),
            from: self.from.clone(),
            subject: notification.subject(),
            body: notification.body(),
        };

        match self.transport.send(&message).await {
            Ok(()) => info!("Sent notification: {}", message.subject),
            Err(e) => warn!("Failed to send notification '{}': {}", message.subject, e),
        }
    }
}
