//! # Bufo Bot Library
//!
//! A Bluesky bot that watches the Jetstream firehose for posts containing the
//! phrase of a bufo image name (`bufo-hop-in-we-re-going.gif` matches a post
//! saying "hop in, we're going") and quote-posts them with that image.
//!
//! ## Features
//!
//! - Persistent Jetstream consumer with exponential reconnect backoff
//! - Exact, case-insensitive phrase matching with first-match-wins ordering
//! - Quote posts with image or video embeds via the AT Protocol XRPC API
//! - Per-image cooldown so the same bufo is not posted twice in a row
//! - Dry-run mode (posting is off unless explicitly enabled)
//!
//! ## Configuration
//!
//! Configuration is read from the environment (a `.env` file is honoured):
//! - `BSKY_HANDLE` / `BSKY_APP_PASSWORD`: account credentials, required when posting
//! - `POSTING_ENABLED`: must be `true` for the bot to post (defaults to `false`)
//! - `JETSTREAM_ENDPOINT`: Jetstream host (defaults to `jetstream2.us-east.bsky.network`)
//! - `MIN_PHRASE_WORDS`, `COOLDOWN_MINUTES`, `EXCLUDE_PATTERNS`, `QUOTE_CHANCE`,
//!   `CATALOG_URL`, `HTTP_TIMEOUT_SECS`, `STREAM_IDLE_TIMEOUT_SECS`
//!
//! ## Logging
//!
//! Log levels can be controlled via the `RUST_LOG` environment variable.

pub mod bluesky;
pub mod bot;
pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod jetstream;
pub mod matcher;
pub mod pipeline;

// Re-export commonly used types and functions
pub use bluesky::{BlobRef, SocialApi, SocialClient};
pub use bot::{load_matcher, spawn_cooldown_sweeper, Bot};
pub use catalog::{ExcludeFilter, RawEntry};
pub use config::BotConfig;
pub use cooldown::CooldownStore;
pub use error::{BotError, Result};
pub use jetstream::{Backoff, EventHandler, StreamConsumer, StreamEvent};
pub use matcher::{CatalogEntry, PhraseMatcher};
pub use pipeline::{Match, MediaKind, PostOutcome, PostingPipeline};
