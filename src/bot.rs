//! Bot wiring.
//!
//! [`Bot`] is the context handed to the firehose consumer: the phrase index plus
//! the posting pipeline. This module also loads the catalog into a matcher and
//! runs the periodic cooldown sweep.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::bluesky::{sanitize_for_logging, SocialApi};
use crate::catalog::{load_catalog, ExcludeFilter};
use crate::config::BotConfig;
use crate::error::{BotError, Result};
use crate::jetstream::{EventHandler, StreamEvent};
use crate::matcher::PhraseMatcher;
use crate::pipeline::{Match, PostOutcome, PostingPipeline};

/// How often expired cooldown records are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Records older than this many cooldown windows are swept.
const SWEEP_WINDOWS: i32 = 4;

/// Fetches the catalog, drops excluded entries and builds the phrase index.
///
/// # Errors
///
/// Fails if the catalog cannot be fetched, an exclude pattern is invalid, or no
/// entry survives filtering.
pub async fn load_matcher(config: &BotConfig) -> Result<PhraseMatcher> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let entries = load_catalog(&http, &config.catalog_url).await?;
    let filter = ExcludeFilter::new(&config.exclude_patterns)?;
    let entries = filter.apply(entries);

    let matcher = PhraseMatcher::build(entries, config.min_phrase_words);
    if matcher.count() == 0 {
        return Err(BotError::Catalog(
            "no catalog entries left to match against".to_string(),
        ));
    }
    Ok(matcher)
}

/// Everything the firehose handler needs.
pub struct Bot<C: ?Sized> {
    matcher: Arc<PhraseMatcher>,
    pipeline: PostingPipeline<C>,
}

impl<C> Bot<C>
where
    C: SocialApi + ?Sized,
{
    pub fn new(matcher: Arc<PhraseMatcher>, pipeline: PostingPipeline<C>) -> Self {
        Self { matcher, pipeline }
    }

    pub fn matcher(&self) -> &PhraseMatcher {
        &self.matcher
    }

    pub fn pipeline(&self) -> &PostingPipeline<C> {
        &self.pipeline
    }

    /// Matches one post and, on a hit, runs the posting pipeline.
    ///
    /// Returns `None` when nothing matched.
    pub async fn process(&self, event: &StreamEvent) -> Option<PostOutcome> {
        let entry = self.matcher.find_match(&event.text)?;
        info!("Match: '{}' -> {}", entry.phrase_text(), entry.name);
        debug!(
            "Matched post {}: {}",
            event.uri,
            sanitize_for_logging(&event.text, 200)
        );

        let found = Match { entry, event };
        Some(self.pipeline.run(&found).await)
    }

    /// Drops cooldown records older than a few windows. Returns how many were removed.
    ///
    /// Nothing is swept when that age does not fit in a `chrono::Duration`.
    pub async fn sweep_cooldowns(&self) -> usize {
        let store = self.pipeline.cooldowns();
        let Some(max_age) = store.window().checked_mul(SWEEP_WINDOWS) else {
            warn!(
                "Cooldown window of {}s is too large to sweep",
                store.window().num_seconds()
            );
            return 0;
        };
        store.sweep(Utc::now(), max_age).await
    }
}

#[async_trait]
impl<C> EventHandler for Bot<C>
where
    C: SocialApi + ?Sized,
{
    async fn handle(&self, event: StreamEvent) {
        self.process(&event).await;
    }
}

/// Sweeps expired cooldown records every hour for as long as the bot lives.
pub fn spawn_cooldown_sweeper<C>(bot: Arc<Bot<C>>) -> tokio::task::JoinHandle<()>
where
    C: SocialApi + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = bot.sweep_cooldowns().await;
            if removed > 0 {
                info!("Swept {} expired cooldown records", removed);
            }
        }
    })
}
