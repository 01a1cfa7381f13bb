//! Push service: WebSocket endpoint plus notification-topic listener.
//!
//! Each `/ws` session registers a [`ChannelConnection`] with the shared
//! [`PushRegistry`] and pumps whatever lands on its channel into the socket.
//! The listener turns `NewImage:<id>` notifications into registry broadcasts.
//! Client frames are read only to notice the socket closing.

use crate::broker::{BrokerError, Subscription};
use crate::notifier::parse_notification;
use crate::registry::{ChannelConnection, PushRegistry, SubscriberConnection};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const WS_PATH: &str = "/ws";

pub fn router(registry: Arc<PushRegistry>) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(registry)
}

async fn ws_handler(ws: WebSocketUpgrade, State(registry): State<Arc<PushRegistry>>) -> Response {
    ws.on_upgrade(move |socket| session(socket, registry))
}

async fn session(socket: WebSocket, registry: Arc<PushRegistry>) {
    let (connection, mut outbound) = ChannelConnection::new();
    let id = connection.id();
    registry.register(Arc::new(connection));

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Registry dropped its handle: drained or pruned
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    registry.unregister(id);
    debug!(connection = id.0, "Push session ended");
}

/// Relay completion notifications to subscribers until shutdown.
///
/// Returns `Ok` on shutdown and [`BrokerError::Closed`] if the subscription
/// ends first. Either way the registry is drained before returning.
pub async fn run_listener(
    mut subscription: Subscription,
    registry: Arc<PushRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BrokerError> {
    info!(topic = %subscription.topic(), "Push listener started");

    let result = loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown signal received, stopping push listener");
                    break Ok(());
                }
            }
            message = subscription.next() => match message {
                Some(payload) => match parse_notification(&payload) {
                    Some(event) => {
                        registry.broadcast(&event);
                    }
                    None => warn!(payload = %payload, "Ignoring unrecognised notification"),
                },
                None => {
                    warn!(topic = %subscription.topic(), "Notification stream ended");
                    break Err(BrokerError::Closed(subscription.topic().to_string()));
                }
            },
        }
    };

    let drained = registry.drain();
    info!(drained, "Push registry drained");
    result
}
