//! Quote-posting workflow for a single match.
//!
//! Checks the posting switch and the entry's cooldown, then fetches the media,
//! uploads it, resolves the quoted post and creates the quote post. The cooldown
//! lock is held for the whole attempt and the cooldown is only recorded when every
//! step succeeded.

use chrono::{DateTime, Utc};
use log::{error, info};
use std::sync::Arc;

use crate::bluesky::SocialApi;
use crate::cooldown::CooldownStore;
use crate::error::{BotError, Result};
use crate::jetstream::StreamEvent;
use crate::matcher::CatalogEntry;

/// Upper bound on alt text length, in characters.
pub const ALT_TEXT_MAX_CHARS: usize = 300;

/// Source of the current time. Swappable so cooldown expiry can be exercised.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Media type of a catalog entry, inferred from its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Gif,
    Png,
    /// Any other still image
    Jpeg,
    Mp4,
    QuickTime,
    WebM,
}

impl MediaKind {
    /// Infers the kind from the URL path suffix, ignoring case, query and fragment.
    ///
    /// # Parameters
    ///
    /// - `url`: Location of the media
    ///
    /// # Returns
    ///
    /// The matching kind. Unknown suffixes are treated as a generic still image.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".gif") {
            MediaKind::Gif
        } else if path.ends_with(".png") {
            MediaKind::Png
        } else if path.ends_with(".mp4") {
            MediaKind::Mp4
        } else if path.ends_with(".mov") {
            MediaKind::QuickTime
        } else if path.ends_with(".webm") {
            MediaKind::WebM
        } else {
            MediaKind::Jpeg
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Gif => "image/gif",
            MediaKind::Png => "image/png",
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Mp4 => "video/mp4",
            MediaKind::QuickTime => "video/quicktime",
            MediaKind::WebM => "video/webm",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Mp4 | MediaKind::QuickTime | MediaKind::WebM)
    }
}

/// Alt text for an entry: the name up to its extension, separators as spaces.
///
/// # Parameters
///
/// - `name`: The catalog entry name, e.g. `bufo-hop-in-we-re-going.gif`
///
/// # Returns
///
/// At most [`ALT_TEXT_MAX_CHARS`] characters, trimmed
pub fn alt_text(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    let alt: String = stem
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .take(ALT_TEXT_MAX_CHARS)
        .collect();
    alt.trim().to_string()
}

/// A catalog entry matched against a firehose post.
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub entry: &'a CatalogEntry,
    pub event: &'a StreamEvent,
}

/// What happened to one match.
#[derive(Debug)]
pub enum PostOutcome {
    /// Posting is switched off
    Disabled,
    /// The entry was posted within the cooldown window
    CoolingDown,
    Posted { uri: String },
    Failed(BotError),
}

/// Runs the posting workflow against a [`SocialApi`].
pub struct PostingPipeline<C: ?Sized> {
    client: Arc<C>,
    cooldowns: CooldownStore,
    posting_enabled: bool,
    clock: Clock,
}

impl<C> PostingPipeline<C>
where
    C: SocialApi + ?Sized,
{
    /// Creates a pipeline that reads the time from the system clock.
    ///
    /// # Parameters
    ///
    /// - `client`: The platform client every outbound call goes through
    /// - `cooldowns`: Per-entry cooldown records
    /// - `posting_enabled`: When false every match ends as [`PostOutcome::Disabled`]
    pub fn new(client: Arc<C>, cooldowns: CooldownStore, posting_enabled: bool) -> Self {
        Self {
            client,
            cooldowns,
            posting_enabled,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cooldowns(&self) -> &CooldownStore {
        &self.cooldowns
    }

    pub fn posting_enabled(&self) -> bool {
        self.posting_enabled
    }

    /// Posts one match, honouring the posting switch and the entry cooldown.
    ///
    /// The cooldown is recorded only when every step succeeded. A failed step
    /// is logged and leaves the entry free to be posted by the next match.
    ///
    /// # Parameters
    ///
    /// - `found`: The matched entry and the post that triggered it
    ///
    /// # Returns
    ///
    /// - `PostOutcome::Disabled`: posting is switched off, nothing was called
    /// - `PostOutcome::CoolingDown`: the entry was posted within the window
    /// - `PostOutcome::Posted { uri }`: the new quote post
    /// - `PostOutcome::Failed(error)`: the first step that failed
    pub async fn run(&self, found: &Match<'_>) -> PostOutcome {
        let entry = found.entry;

        if !self.posting_enabled {
            info!("Posting disabled, skipping {}", entry.name);
            return PostOutcome::Disabled;
        }

        let Some(guard) = self.cooldowns.begin(&entry.name, (self.clock)()).await else {
            info!("Cooldown active for {}, skipping", entry.name);
            return PostOutcome::CoolingDown;
        };

        match self.publish(found).await {
            Ok(uri) => {
                guard.record_success((self.clock)());
                info!(
                    "Posted bufo reply: {} (phrase: {}) quoting {} -> {}",
                    entry.name,
                    entry.phrase_text(),
                    found.event.uri,
                    uri
                );
                PostOutcome::Posted { uri }
            }
            Err(e) => {
                drop(guard);
                error!("Failed to post {}: {}", entry.name, e);
                PostOutcome::Failed(e)
            }
        }
    }

    async fn publish(&self, found: &Match<'_>) -> Result<String> {
        let entry = found.entry;
        let quoted_uri = found.event.uri.as_str();

        info!("Fetching media: {}", entry.url);
        let bytes = self.client.fetch_bytes(&entry.url).await?;
        let kind = MediaKind::from_url(&entry.url);
        let alt = alt_text(&entry.name);

        if kind.is_video() {
            let job_id = self
                .client
                .upload_video(bytes, &entry.name, kind.mime_type())
                .await?;
            let video = self.client.poll_video_job(&job_id).await?;
            let cid = self.client.resolve_quote_cid(quoted_uri).await?;
            self.client
                .create_quote_post_with_video(quoted_uri, &cid, &video, &alt)
                .await
        } else {
            let blob = self.client.upload_blob(bytes, kind.mime_type()).await?;
            let cid = self.client.resolve_quote_cid(quoted_uri).await?;
            self.client
                .create_quote_post(quoted_uri, &cid, &blob, &alt)
                .await
        }
    }
}
