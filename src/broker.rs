//! Message broker abstraction.
//!
//! Two implementations share the [`Broker`] trait:
//!
//! - [`RedisBroker`]: Redis pub/sub. A topic is a channel name.
//! - [`InMemoryBroker`]: process-local topics for tests and single-process runs.
//!
//! Both hand out a [`Subscription`], a stream of text payloads backed by a
//! bounded channel. For Redis, a forwarding task owns the dedicated pub/sub
//! connection and pushes payloads into that channel, so the consumer never
//! touches the connection. Publishes go through one multiplexed connection,
//! which pipelines commands from concurrent callers over a single socket.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Messages buffered per subscription before the forwarder waits.
const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("subscription to '{0}' closed")]
    Closed(String),
}

/// A live subscription to one topic.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload, or `None` once the broker side is gone.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError>;

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;
}

/// Redis pub/sub broker.
pub struct RedisBroker {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        info!(url = %url, "Connected to broker");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError> {
        // PubSub requires a dedicated connection, not multiplexed
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = topic.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(topic = %channel, error = %e, "Dropping non-text broker message");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    debug!(topic = %channel, "Subscriber dropped, stopping forwarder");
                    return;
                }
            }
            warn!(topic = %channel, "Broker subscription stream ended");
        });

        info!(topic = %topic, "Subscribed");
        Ok(Subscription::new(topic, rx))
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }
}

/// Process-local broker with topic fan-out semantics.
///
/// Every subscriber of a topic receives every message published after it
/// subscribed. Closed subscribers are pruned on the next publish.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every subscriber sender, ending their subscriptions.
    pub fn close(&self) {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(topic, rx))
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let senders: Vec<mpsc::Sender<String>> = {
            let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            let Some(list) = topics.get_mut(topic) else {
                return Ok(());
            };
            list.retain(|tx| !tx.is_closed());
            list.clone()
        };
        for tx in senders {
            // A subscriber that went away between the snapshot and the send is not an error
            let _ = tx.send(payload.to_string()).await;
        }
        Ok(())
    }
}
