//! Jetstream firehose consumer.
//!
//! Keeps one WebSocket connection to a Jetstream instance subscribed to
//! `app.bsky.feed.post`, decodes each message, and hands new posts to an
//! [`EventHandler`] inline. Any failure tears the connection down and reconnects
//! after an exponential backoff capped at 60 seconds.

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::bluesky::POST_COLLECTION;
use crate::error::{BotError, Result};

/// A new post taken from the firehose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// `at://{actor_id}/app.bsky.feed.post/{record_key}`
    pub uri: String,
    pub text: String,
    pub actor_id: String,
    pub record_key: String,
}

impl StreamEvent {
    pub fn new(
        actor_id: impl Into<String>,
        record_key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let actor_id = actor_id.into();
        let record_key = record_key.into();
        Self {
            uri: format!("at://{}/{}/{}", actor_id, POST_COLLECTION, record_key),
            text: text.into(),
            actor_id,
            record_key,
        }
    }
}

/// Receives every accepted event, one at a time, inside the receive loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: StreamEvent);
}

#[derive(Debug, Deserialize)]
struct JetstreamMessage {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    did: String,
    #[serde(default)]
    commit: Option<Commit>,
}

#[derive(Debug, Deserialize)]
struct Commit {
    #[serde(default)]
    collection: String,
    #[serde(default)]
    operation: String,
    #[serde(default)]
    rkey: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
}

/// Decodes one Jetstream message.
///
/// Returns `Ok(None)` for anything that is not a non-empty post creation in
/// `collection`. Only malformed JSON is an error.
pub fn decode_event(
    raw: &str,
    collection: &str,
) -> std::result::Result<Option<StreamEvent>, serde_json::Error> {
    let message: JetstreamMessage = serde_json::from_str(raw)?;
    if message.kind != "commit" {
        return Ok(None);
    }
    let Some(commit) = message.commit else {
        return Ok(None);
    };
    if commit.collection != collection || commit.operation != "create" {
        return Ok(None);
    }
    if message.did.is_empty() || commit.rkey.is_empty() {
        return Ok(None);
    }

    let text = commit
        .record
        .as_ref()
        .and_then(|r| r.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(StreamEvent::new(message.did, commit.rkey, text)))
}

/// Exponential reconnect delay.
///
/// Doubles after every use up to the cap and is never reset, so the delay carries
/// over from one connection attempt to the next for the life of the consumer.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Builds the subscription URL for a Jetstream host.
pub fn subscribe_url(endpoint: &str) -> String {
    format!(
        "wss://{}/subscribe?wantedCollections={}",
        endpoint, POST_COLLECTION
    )
}

/// Persistent firehose connection with reconnect.
#[derive(Debug)]
pub struct StreamConsumer {
    url: String,
    collection: String,
    backoff: Backoff,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl StreamConsumer {
    /// Consumer for the Jetstream instance at `endpoint` (a host name).
    pub fn new(endpoint: &str) -> Self {
        Self::with_url(subscribe_url(endpoint))
    }

    /// Consumer for a full WebSocket URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            collection: POST_COLLECTION.to_string(),
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Consumes the firehose forever.
    ///
    /// Never returns; the task is stopped only by dropping it or process shutdown.
    pub async fn run<H>(&mut self, handler: &H)
    where
        H: EventHandler + ?Sized,
    {
        loop {
            info!("Connecting to jetstream at {}", self.url);
            let reason = match self.consume(handler).await {
                Ok(()) => "stream closed by server".to_string(),
                Err(e) => e.to_string(),
            };
            let delay = self.backoff.next_delay();
            warn!(
                "Jetstream connection error: {}, reconnecting in {}s",
                reason,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection: connect, then receive until the connection fails or closes.
    async fn consume<H>(&self, handler: &H) -> Result<()>
    where
        H: EventHandler + ?Sized,
    {
        let (mut ws, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    BotError::stream(format!(
                        "connect timed out after {}s",
                        self.connect_timeout.as_secs()
                    ))
                })?
                .map_err(|e| BotError::stream(format!("connect failed: {}", e)))?;

        info!("Connected to jetstream");

        loop {
            let next = tokio::time::timeout(self.idle_timeout, ws.next())
                .await
                .map_err(|_| {
                    BotError::stream(format!(
                        "no message received for {}s",
                        self.idle_timeout.as_secs()
                    ))
                })?;

            match next {
                Some(Ok(Message::Text(text))) => self.dispatch(&text, handler).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.dispatch(text, handler).await,
                    Err(e) => warn!("Skipping non-UTF-8 binary message: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Received close frame: {:?}", frame);
                    return Ok(());
                }
                // pings are answered by tungstenite on the next read
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(BotError::stream(format!("receive failed: {}", e))),
                None => return Ok(()),
            }
        }
    }

    async fn dispatch<H>(&self, raw: &str, handler: &H)
    where
        H: EventHandler + ?Sized,
    {
        match decode_event(raw, &self.collection) {
            Ok(Some(event)) => handler.handle(event).await,
            Ok(None) => {}
            Err(e) => warn!("Skipping malformed message: {}", e),
        }
    }
}
