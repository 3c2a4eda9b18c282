//! Jetstream consumer tests against a local WebSocket server.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::SinkExt;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::jetstream::{Backoff, EventHandler, StreamConsumer, StreamEvent};

/// Forwards every event to a channel.
struct Forward(mpsc::UnboundedSender<StreamEvent>);

#[async_trait]
impl EventHandler for Forward {
    async fn handle(&self, event: StreamEvent) {
        let _ = self.0.send(event);
    }
}

/// Accepts WebSocket connections forever, numbering them from 1.
///
/// Returns the subscription URL and the number of accepted connections so far.
async fn serve_ws<F, Fut>(on_connect: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(usize, WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!(
        "ws://{}/subscribe?wantedCollections=app.bsky.feed.post",
        listener.local_addr().unwrap()
    );
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                continue;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(on_connect(n, ws));
        }
    });

    (url, connections)
}

fn spawn_consumer(url: &str, idle: Duration) -> (tokio::task::JoinHandle<()>, mpsc::UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut consumer = StreamConsumer::with_url(url)
        .with_backoff(Backoff::new(Duration::from_millis(10), Duration::from_millis(50)))
        .with_idle_timeout(idle)
        .with_connect_timeout(Duration::from_secs(2));

    let task = tokio::spawn(async move {
        let handler = Forward(tx);
        consumer.run(&handler).await;
    });
    (task, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("consumer stopped")
}

fn post_create(did: &str, rkey: &str, text: &str) -> String {
    json!({
        "did": did,
        "time_us": 1725911162329308u64,
        "kind": "commit",
        "commit": {
            "rev": "3l3qo2vutsw2b",
            "operation": "create",
            "collection": "app.bsky.feed.post",
            "rkey": rkey,
            "record": {
                "$type": "app.bsky.feed.post",
                "createdAt": "2024-09-09T19:46:02.102Z",
                "langs": ["en"],
                "text": text,
            },
            "cid": "bafyreidwaivazkwu67xztlmuobx35hs2lnfh3kolmgfmucldvhd3sgzcqi",
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_only_post_creations_reach_the_handler() {
    let (url, _connections) = serve_ws(|_, mut ws| async move {
        let frames = vec![
            json!({"did": "did:plc:a", "kind": "identity", "identity": {"handle": "a.test"}}).to_string(),
            "{not json".to_string(),
            json!({
                "did": "did:plc:a",
                "kind": "commit",
                "commit": {"operation": "delete", "collection": "app.bsky.feed.post", "rkey": "old"}
            })
            .to_string(),
            json!({
                "did": "did:plc:a",
                "kind": "commit",
                "commit": {
                    "operation": "create",
                    "collection": "app.bsky.feed.like",
                    "rkey": "like1",
                    "record": {"subject": {"uri": "at://x"}}
                }
            })
            .to_string(),
            post_create("did:plc:a", "empty", ""),
            post_create("did:plc:a", "3kfirst", "ok hop in we're going"),
            post_create("did:plc:b", "3ksecond", "this is fine"),
        ];
        for frame in frames {
            ws.send(Message::Text(frame)).await.unwrap();
        }
        // hold the connection open
        tokio::time::sleep(Duration::from_secs(30)).await;
    })
    .await;

    let (task, mut rx) = spawn_consumer(&url, Duration::from_secs(10));

    let first = next_event(&mut rx).await;
    assert_eq!(first.uri, "at://did:plc:a/app.bsky.feed.post/3kfirst");
    assert_eq!(first.text, "ok hop in we're going");
    assert_eq!(first.actor_id, "did:plc:a");

    let second = next_event(&mut rx).await;
    assert_eq!(second.record_key, "3ksecond");

    // nothing else was accepted
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    task.abort();
}

#[tokio::test]
async fn test_reconnects_after_server_closes() {
    let (url, connections) = serve_ws(|n, mut ws| async move {
        let _ = ws
            .send(Message::Text(post_create("did:plc:a", &n.to_string(), "hello again")))
            .await;
        let _ = ws.close(None).await;
    })
    .await;

    let (task, mut rx) = spawn_consumer(&url, Duration::from_secs(10));

    assert_eq!(next_event(&mut rx).await.record_key, "1");
    assert_eq!(next_event(&mut rx).await.record_key, "2");
    assert!(connections.load(Ordering::SeqCst) >= 2);
    task.abort();
}

#[tokio::test]
async fn test_backoff_keeps_growing_across_successful_connections() {
    let accepted = Arc::new(Mutex::new(Vec::new()));
    let times = accepted.clone();
    let (url, _connections) = serve_ws(move |_, mut ws| {
        times.lock().unwrap().push(Instant::now());
        async move {
            let _ = ws.close(None).await;
        }
    })
    .await;

    // delays of 20, 40, 80 and 160ms, capped at 1s
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut consumer = StreamConsumer::with_url(url)
        .with_backoff(Backoff::new(Duration::from_millis(20), Duration::from_secs(1)))
        .with_idle_timeout(Duration::from_secs(10));
    let task = tokio::spawn(async move {
        consumer.run(&Forward(tx)).await;
    });

    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while accepted.lock().unwrap().len() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    task.abort();
    assert!(reached.is_ok(), "consumer stopped reconnecting");

    let times = accepted.lock().unwrap().clone();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    // every connection succeeded, yet each wait is at least the doubled delay
    assert!(gaps[1] >= Duration::from_millis(40), "gaps {:?}", gaps);
    assert!(gaps[2] >= Duration::from_millis(80), "gaps {:?}", gaps);
    assert!(gaps[3] >= Duration::from_millis(160), "gaps {:?}", gaps);
}

#[tokio::test]
async fn test_idle_connection_is_replaced() {
    let (url, connections) = serve_ws(|_, ws| async move {
        // never send anything
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(ws);
    })
    .await;

    let (task, _rx) = spawn_consumer(&url, Duration::from_millis(50));

    let reconnected = tokio::time::timeout(Duration::from_secs(5), async {
        while connections.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reconnected.is_ok(), "consumer did not reconnect after going idle");
    task.abort();
}

#[tokio::test]
async fn test_unreachable_endpoint_keeps_retrying() {
    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (task, _rx) = spawn_consumer(&format!("ws://{}/subscribe", addr), Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());
    task.abort();
}
