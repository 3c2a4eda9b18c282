//! Posting pipeline tests against a scripted `SocialApi`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::bluesky::{BlobRef, SocialApi};
use crate::bot::Bot;
use crate::catalog::RawEntry;
use crate::cooldown::CooldownStore;
use crate::error::{BotError, Result};
use crate::jetstream::StreamEvent;
use crate::matcher::{CatalogEntry, PhraseMatcher};
use crate::pipeline::{Clock, Match, PostOutcome, PostingPipeline};

/// Records every call and fails the step named in `fail_at`.
#[derive(Default)]
struct ScriptedApi {
    calls: Mutex<Vec<String>>,
    fail_at: Mutex<Option<&'static str>>,
}

impl ScriptedApi {
    fn fail_at(&self, step: &'static str) {
        *self.fail_at.lock().unwrap() = Some(step);
    }

    fn succeed(&self) {
        *self.fail_at.lock().unwrap() = None;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn step(&self, call: String, step: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if *self.fail_at.lock().unwrap() != Some(step) {
            return Ok(());
        }
        let msg = format!("{} scripted to fail", step);
        Err(match step {
            "fetch" => BotError::FetchFailure(msg),
            "upload_blob" => BotError::UploadFailure(msg),
            "resolve" => BotError::RecordLookupFailure(msg),
            "upload_video" => BotError::VideoUploadFailure(msg),
            "poll" => BotError::VideoTimeout { attempts: 60 },
            _ => BotError::PostFailure(msg),
        })
    }
}

#[async_trait]
impl SocialApi for ScriptedApi {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.step(format!("fetch {}", url), "fetch")?;
        Ok(b"GIF89a".to_vec())
    }

    async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef> {
        self.step(
            format!("upload_blob {} {}", bytes.len(), content_type),
            "upload_blob",
        )?;
        Ok(BlobRef(json!({"$type": "blob", "ref": {"$link": "bafkimage"}})))
    }

    async fn resolve_quote_cid(&self, uri: &str) -> Result<String> {
        self.step(format!("resolve {}", uri), "resolve")?;
        Ok("bafyquoted".to_string())
    }

    async fn create_quote_post(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        media: &BlobRef,
        alt_text: &str,
    ) -> Result<String> {
        self.step(
            format!(
                "create_quote_post {} {} {} {}",
                quoted_uri, quoted_cid, media.0["ref"]["$link"], alt_text
            ),
            "create",
        )?;
        Ok("at://did:plc:bot/app.bsky.feed.post/new".to_string())
    }

    async fn upload_video(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String> {
        self.step(
            format!("upload_video {} {} {}", bytes.len(), filename, content_type),
            "upload_video",
        )?;
        Ok("job-1".to_string())
    }

    async fn poll_video_job(&self, job_id: &str) -> Result<BlobRef> {
        self.step(format!("poll {}", job_id), "poll")?;
        Ok(BlobRef(json!({"$type": "blob", "ref": {"$link": "bafkvideo"}})))
    }

    async fn create_quote_post_with_video(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        video: &BlobRef,
        alt_text: &str,
    ) -> Result<String> {
        self.step(
            format!(
                "create_quote_post_with_video {} {} {} {}",
                quoted_uri, quoted_cid, video.0["ref"]["$link"], alt_text
            ),
            "create",
        )?;
        Ok("at://did:plc:bot/app.bsky.feed.post/video".to_string())
    }
}

/// A clock the test can move forward.
fn manual_clock(start: DateTime<Utc>) -> (Arc<Mutex<DateTime<Utc>>>, Clock) {
    let now = Arc::new(Mutex::new(start));
    let handle = now.clone();
    let clock: Clock = Arc::new(move || *handle.lock().unwrap());
    (now, clock)
}

fn catalog_entry(name: &str) -> CatalogEntry {
    CatalogEntry::from_raw(RawEntry::new(
        name,
        format!("https://all-the.bufo.zone/{}", name),
    ))
}

fn post() -> StreamEvent {
    StreamEvent::new("did:plc:poster", "3kabc", "ok hop in we're going")
}

fn pipeline(api: &Arc<ScriptedApi>, enabled: bool) -> PostingPipeline<ScriptedApi> {
    PostingPipeline::new(
        api.clone(),
        CooldownStore::new(chrono::Duration::minutes(120)),
        enabled,
    )
}

#[tokio::test]
async fn test_posting_disabled_makes_no_calls() {
    let api = Arc::new(ScriptedApi::default());
    let pipeline = pipeline(&api, false);
    let entry = catalog_entry("bufo-hop-in-we-re-going.gif");
    let event = post();

    let outcome = pipeline.run(&Match { entry: &entry, event: &event }).await;

    assert!(matches!(outcome, PostOutcome::Disabled));
    assert!(api.calls().is_empty());
    assert!(pipeline.cooldowns().is_empty().await);
}

#[tokio::test]
async fn test_image_post_runs_every_step_in_order() {
    let api = Arc::new(ScriptedApi::default());
    let pipeline = pipeline(&api, true);
    let entry = catalog_entry("bufo-hop-in-we-re-going.gif");
    let event = post();

    let outcome = pipeline.run(&Match { entry: &entry, event: &event }).await;

    match outcome {
        PostOutcome::Posted { uri } => assert_eq!(uri, "at://did:plc:bot/app.bsky.feed.post/new"),
        other => panic!("expected a post, got {:?}", other),
    }
    assert_eq!(
        api.calls(),
        vec![
            "fetch https://all-the.bufo.zone/bufo-hop-in-we-re-going.gif".to_string(),
            "upload_blob 6 image/gif".to_string(),
            "resolve at://did:plc:poster/app.bsky.feed.post/3kabc".to_string(),
            "create_quote_post at://did:plc:poster/app.bsky.feed.post/3kabc bafyquoted \"bafkimage\" bufo hop in we re going".to_string(),
        ]
    );
    assert!(pipeline
        .cooldowns()
        .last_posted("bufo-hop-in-we-re-going.gif")
        .await
        .is_some());
}

#[tokio::test]
async fn test_cooldown_skips_repeat_until_window_elapses() {
    let api = Arc::new(ScriptedApi::default());
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let (now, clock) = manual_clock(start);
    let pipeline = pipeline(&api, true).with_clock(clock);
    let entry = catalog_entry("bufo-hop-in-we-re-going.gif");
    let event = post();
    let found = Match { entry: &entry, event: &event };

    assert!(matches!(pipeline.run(&found).await, PostOutcome::Posted { .. }));
    api.clear();

    *now.lock().unwrap() = start + chrono::Duration::minutes(60);
    assert!(matches!(pipeline.run(&found).await, PostOutcome::CoolingDown));
    assert!(api.calls().is_empty(), "a skipped attempt makes no calls");

    *now.lock().unwrap() = start + chrono::Duration::minutes(121);
    assert!(matches!(pipeline.run(&found).await, PostOutcome::Posted { .. }));
    assert_eq!(
        pipeline.cooldowns().last_posted(&entry.name).await,
        Some(start + chrono::Duration::minutes(121))
    );
}

#[tokio::test]
async fn test_failed_step_leaves_cooldown_untouched() {
    let entry = catalog_entry("bufo-hop-in-we-re-going.gif");
    let event = post();
    let found = Match { entry: &entry, event: &event };

    for (step, expected_calls) in [("fetch", 1), ("upload_blob", 2), ("resolve", 3), ("create", 4)] {
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline(&api, true);
        api.fail_at(step);

        match pipeline.run(&found).await {
            PostOutcome::Failed(_) => {}
            other => panic!("expected failure at {}, got {:?}", step, other),
        }
        assert_eq!(api.calls().len(), expected_calls, "step {}", step);
        assert_eq!(pipeline.cooldowns().last_posted(&entry.name).await, None);

        // the failure does not block the next attempt
        api.succeed();
        assert!(matches!(pipeline.run(&found).await, PostOutcome::Posted { .. }));
    }
}

#[tokio::test]
async fn test_failure_reports_the_failing_step() {
    let api = Arc::new(ScriptedApi::default());
    let pipeline = pipeline(&api, true);
    api.fail_at("upload_blob");

    let entry = catalog_entry("bufo-hop-in-we-re-going.gif");
    let event = post();
    match pipeline.run(&Match { entry: &entry, event: &event }).await {
        PostOutcome::Failed(BotError::UploadFailure(_)) => {}
        other => panic!("expected upload failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_video_entry_uses_video_flow() {
    let api = Arc::new(ScriptedApi::default());
    let pipeline = pipeline(&api, true);
    let entry = catalog_entry("bufo-dance-party-all-night.mp4");
    let event = post();

    let outcome = pipeline.run(&Match { entry: &entry, event: &event }).await;

    assert!(matches!(outcome, PostOutcome::Posted { .. }));
    assert_eq!(
        api.calls(),
        vec![
            "fetch https://all-the.bufo.zone/bufo-dance-party-all-night.mp4".to_string(),
            "upload_video 6 bufo-dance-party-all-night.mp4 video/mp4".to_string(),
            "poll job-1".to_string(),
            "resolve at://did:plc:poster/app.bsky.feed.post/3kabc".to_string(),
            "create_quote_post_with_video at://did:plc:poster/app.bsky.feed.post/3kabc bafyquoted \"bafkvideo\" bufo dance party all night".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_video_upload_carries_the_entry_mime_type() {
    let api = Arc::new(ScriptedApi::default());
    let pipeline = pipeline(&api, true);
    let event = post();

    for (name, mime) in [
        ("bufo-dance-party-all-night.webm", "video/webm"),
        ("bufo-dance-party-all-day.mov", "video/quicktime"),
    ] {
        api.clear();
        let entry = catalog_entry(name);
        let outcome = pipeline.run(&Match { entry: &entry, event: &event }).await;
        assert!(matches!(outcome, PostOutcome::Posted { .. }), "{}", name);
        assert_eq!(api.calls()[1], format!("upload_video 6 {} {}", name, mime));
    }
}

#[tokio::test]
async fn test_video_timeout_aborts_without_cooldown() {
    let api = Arc::new(ScriptedApi::default());
    let pipeline = pipeline(&api, true);
    api.fail_at("poll");
    let entry = catalog_entry("bufo-dance-party-all-night.mp4");
    let event = post();

    match pipeline.run(&Match { entry: &entry, event: &event }).await {
        PostOutcome::Failed(BotError::VideoTimeout { attempts }) => assert_eq!(attempts, 60),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(api.calls().len(), 3);
    assert!(pipeline.cooldowns().is_empty().await);
}

#[tokio::test]
async fn test_bot_only_posts_matching_events() {
    let api = Arc::new(ScriptedApi::default());
    let matcher = Arc::new(PhraseMatcher::build(
        vec![
            RawEntry::new("bufo-hop-in-we-re-going.gif", "https://x/hop.gif"),
            RawEntry::new("bufo-this-is-fine-actually.png", "https://x/fine.png"),
        ],
        4,
    ));
    let bot = Bot::new(matcher, pipeline(&api, true));

    let quiet = StreamEvent::new("did:plc:poster", "1", "just a normal post about lunch");
    assert!(bot.process(&quiet).await.is_none());
    assert!(api.calls().is_empty());

    let loud = StreamEvent::new("did:plc:poster", "2", "THIS IS FINE, ACTUALLY.");
    match bot.process(&loud).await {
        Some(PostOutcome::Posted { .. }) => {}
        other => panic!("expected a post, got {:?}", other),
    }
    assert_eq!(api.calls()[0], "fetch https://x/fine.png");

    // the same entry is now cooling down
    let again = StreamEvent::new("did:plc:other", "3", "this is fine actually");
    assert!(matches!(
        bot.process(&again).await,
        Some(PostOutcome::CoolingDown)
    ));
    assert_eq!(bot.sweep_cooldowns().await, 0);
}

#[tokio::test]
async fn test_sweep_with_oversized_window_is_skipped() {
    let api = Arc::new(ScriptedApi::default());
    let matcher = Arc::new(PhraseMatcher::build(
        vec![RawEntry::new("bufo-this-is-fine-actually.png", "https://x/fine.png")],
        4,
    ));
    // four of these windows do not fit in a chrono::Duration
    let window = chrono::Duration::seconds(i64::MAX / 1000);
    let bot = Bot::new(
        matcher,
        PostingPipeline::new(api.clone(), CooldownStore::new(window), true),
    );

    let event = StreamEvent::new("did:plc:poster", "1", "this is fine actually");
    assert!(matches!(
        bot.process(&event).await,
        Some(PostOutcome::Posted { .. })
    ));
    assert_eq!(bot.sweep_cooldowns().await, 0);
    assert_eq!(bot.pipeline().cooldowns().len().await, 1);
}
