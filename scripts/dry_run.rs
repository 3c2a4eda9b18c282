//! Bufo Dry Run Script
//!
//! Streams the firehose and prints the first posts that match a bufo, without
//! logging in or posting anything. Useful for checking `MIN_PHRASE_WORDS` and
//! `EXCLUDE_PATTERNS` against live traffic.
//!
//! ```bash
//! cargo run --bin dry_run            # stop after 20 matches
//! cargo run --bin dry_run -- 5       # stop after 5 matches
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use bufo_bot::{load_matcher, BotConfig, EventHandler, PhraseMatcher, StreamConsumer, StreamEvent};

const DEFAULT_MATCH_LIMIT: usize = 20;

/// Prints matches and signals once the limit is reached.
struct MatchPrinter {
    matcher: PhraseMatcher,
    seen: AtomicUsize,
    limit: usize,
    done: Notify,
}

#[async_trait]
impl EventHandler for MatchPrinter {
    async fn handle(&self, event: StreamEvent) {
        let Some(entry) = self.matcher.find_match(&event.text) else {
            return;
        };

        let count = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        let preview: String = event.text.chars().take(200).collect();
        println!("\n{}", "=".repeat(60));
        println!("POST: {}", preview);
        println!("URI: {}", event.uri);
        println!("BUFO: {}", entry.name);
        println!("PHRASE: {}", entry.phrase_text());
        println!("{}", "=".repeat(60));

        if count >= self.limit {
            self.done.notify_one();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    let limit = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<usize>()
            .map_err(|e| format!("match limit must be a number: {}", e))?,
        None => DEFAULT_MATCH_LIMIT,
    };

    let config = BotConfig::from_env()?;
    let matcher = load_matcher(&config).await?;
    println!("🐸 Loaded {} bufos, watching for {} matches", matcher.count(), limit);

    let printer = Arc::new(MatchPrinter {
        matcher,
        seen: AtomicUsize::new(0),
        limit,
        done: Notify::new(),
    });

    let mut consumer = StreamConsumer::new(&config.jetstream_endpoint)
        .with_idle_timeout(config.stream_idle_timeout);

    tokio::select! {
        _ = consumer.run(printer.as_ref()) => {}
        _ = printer.done.notified() => {
            println!("\n--- stopping after {} matches ---", limit);
        }
    }

    Ok(())
}
