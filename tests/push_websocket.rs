//! Push fan-out over real WebSocket connections.

use futures::{SinkExt, StreamExt};
use split_zoom::broker::{Broker, InMemoryBroker};
use split_zoom::push;
use split_zoom::registry::PushRegistry;
use split_zoom::rpc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const NOTIFY: &str = "imageNotifications";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(registry: Arc<PushRegistry>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(rpc::serve(listener, push::router(registry), std::future::pending()));
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}{}", push::WS_PATH))
        .await
        .unwrap();
    ws
}

/// Registration happens on the server task after the upgrade completes.
async fn wait_for_subscribers(registry: &PushRegistry, count: usize) {
    for _ in 0..200 {
        if registry.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} subscribers, have {}", registry.len());
}

async fn next_text(client: &mut Client) -> Option<String> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .ok()??;
        match frame.ok()? {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn every_subscriber_receives_the_content_id() {
    let registry = Arc::new(PushRegistry::new());
    let addr = start_server(registry.clone()).await;
    let broker = InMemoryBroker::new();
    let (_shutdown, rx) = watch::channel(false);
    let subscription = broker.subscribe(NOTIFY).await.unwrap();
    tokio::spawn(push::run_listener(subscription, registry.clone(), rx));

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_subscribers(&registry, 2).await;

    broker.publish(NOTIFY, "NewImage:7").await.unwrap();

    assert_eq!(next_text(&mut a).await.as_deref(), Some("7"));
    assert_eq!(next_text(&mut b).await.as_deref(), Some("7"));
}

#[tokio::test]
async fn closed_client_is_removed_and_others_still_served() {
    let registry = Arc::new(PushRegistry::new());
    let addr = start_server(registry.clone()).await;
    let broker = InMemoryBroker::new();
    let (_shutdown, rx) = watch::channel(false);
    let subscription = broker.subscribe(NOTIFY).await.unwrap();
    tokio::spawn(push::run_listener(subscription, registry.clone(), rx));

    let mut leaving = connect(addr).await;
    let mut staying = connect(addr).await;
    wait_for_subscribers(&registry, 2).await;

    leaving.close(None).await.unwrap();
    wait_for_subscribers(&registry, 1).await;

    broker.publish(NOTIFY, "NewImage:8").await.unwrap();
    assert_eq!(next_text(&mut staying).await.as_deref(), Some("8"));
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let registry = Arc::new(PushRegistry::new());
    let addr = start_server(registry.clone()).await;
    let broker = InMemoryBroker::new();
    let (shutdown, rx) = watch::channel(false);
    let subscription = broker.subscribe(NOTIFY).await.unwrap();
    let listener = tokio::spawn(push::run_listener(subscription, registry.clone(), rx));

    let mut client = connect(addr).await;
    wait_for_subscribers(&registry, 1).await;

    shutdown.send(true).unwrap();
    listener.await.unwrap().unwrap();

    assert_eq!(next_text(&mut client).await, None);
    assert!(registry.is_empty());
}
