//! Completion notifications.
//!
//! The orchestrator publishes `NewImage:<content id>` on the notification
//! topic once an image is stored; the push service parses the same format
//! back into a [`CompletionEvent`].

use crate::broker::{Broker, BrokerError};
use crate::types::{CompletionEvent, ContentId};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const NOTIFICATION_PREFIX: &str = "NewImage:";

#[derive(Error, Debug)]
#[error("failed to publish completion for content {content_id} on '{topic}': {source}")]
pub struct PublishError {
    pub content_id: ContentId,
    pub topic: String,
    #[source]
    pub source: BrokerError,
}

/// Render the notification payload for an event.
pub fn notification_text(event: &CompletionEvent) -> String {
    format!("{NOTIFICATION_PREFIX}{}", event.content_id)
}

/// Parse a notification payload. `None` for anything that isn't `NewImage:<int>`.
pub fn parse_notification(text: &str) -> Option<CompletionEvent> {
    let id = text.trim().strip_prefix(NOTIFICATION_PREFIX)?;
    id.parse::<i64>()
        .ok()
        .map(|id| CompletionEvent::success(ContentId(id)))
}

/// Publishes one completion event per stored image.
#[derive(Clone)]
pub struct Notifier {
    broker: Arc<dyn Broker>,
    topic: String,
}

impl Notifier {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// One publish attempt; failure is returned, never retried here.
    pub async fn notify(&self, content_id: ContentId) -> Result<CompletionEvent, PublishError> {
        let event = CompletionEvent::success(content_id);
        self.broker
            .publish(&self.topic, &notification_text(&event))
            .await
            .map_err(|source| PublishError {
                content_id,
                topic: self.topic.clone(),
                source,
            })?;
        info!(content_id = %content_id, topic = %self.topic, "Published completion");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;

    #[test]
    fn text_format() {
        let event = CompletionEvent::success(ContentId(17));
        assert_eq!(notification_text(&event), "NewImage:17");
    }

    #[test]
    fn parse_roundtrip() {
        let event = CompletionEvent::success(ContentId(123));
        assert_eq!(parse_notification(&notification_text(&event)), Some(event));
    }

    #[test]
    fn parse_rejects_other_payloads() {
        assert_eq!(parse_notification("OldImage:1"), None);
        assert_eq!(parse_notification("NewImage:"), None);
        assert_eq!(parse_notification("NewImage:abc"), None);
        assert_eq!(parse_notification(""), None);
    }

    #[tokio::test]
    async fn notify_publishes_on_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut sub = broker.subscribe("imageNotifications").await.unwrap();
        let notifier = Notifier::new(broker.clone(), "imageNotifications");

        let event = notifier.notify(ContentId(5)).await.unwrap();

        assert_eq!(event.content_id, ContentId(5));
        assert_eq!(sub.next().await.as_deref(), Some("NewImage:5"));
    }
}
