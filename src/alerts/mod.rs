//! Alert sinks - fire-and-forget notification delivery
//!
//! The consumer hands over a subject and a body; what happens after that
//! (log line, webhook, topic) is the sink's business. Failures come back as
//! [`NotificationError`] and are never retried inline.

mod message;
mod webhook;

pub use message::{crash_alert, format_usd, AlertMessage};
pub use webhook::WebhookAlertSink;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::NotificationError;

/// Notification capability used by the batch consumer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &'static str;

    async fn publish(&self, subject: &str, body: &str) -> Result<(), NotificationError>;
}

/// Emits alerts as structured log records, tagged with a topic
#[derive(Debug, Clone)]
pub struct LogAlertSink {
    topic: String,
}

impl LogAlertSink {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        tracing::warn!(topic = %self.topic, subject = %subject, body = %body, "ALERT");
        Ok(())
    }
}

/// Pick a sink from the configured topic: `http(s)://` URLs post to a
/// webhook, anything else is logged under that topic name
pub fn sink_for_topic(topic: &str, timeout: Duration) -> Result<Arc<dyn AlertSink>> {
    let topic = topic.trim();
    if topic.starts_with("http://") || topic.starts_with("https://") {
        Ok(Arc::new(WebhookAlertSink::new(topic, timeout)?))
    } else {
        Ok(Arc::new(LogAlertSink::new(topic)))
    }
}
