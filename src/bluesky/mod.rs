//! Bluesky / AT Protocol API integration module.
//!
//! This module contains the [`SocialClient`] that performs every outbound call the
//! bot makes to the platform: session creation, PDS resolution, media download,
//! blob upload, record lookup and creation, and the video upload job lifecycle.
//! The posting pipeline only depends on the [`SocialApi`] trait.

mod api;
mod records;
mod video;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use api::{Endpoints, Session, SocialClient};
pub use records::{images_embed, parse_at_uri, quote_post_record, video_embed, AtUri};
pub use video::{JobStatus, VideoJob, VideoJobState, VideoPollSettings};

// Crate-internal re-exports (used by tests and other modules)
#[allow(unused_imports)]
pub(crate) use api::{did_web_document_url, find_pds_endpoint, sanitize_for_logging};
#[allow(unused_imports)]
pub(crate) use video::extract_job_id;

/// Collection the bot reads from and writes to.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Opaque blob reference returned by an upload.
///
/// Carried unmodified from the upload response into the record that embeds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub serde_json::Value);

/// Outbound operations the posting pipeline needs from the platform.
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// Downloads raw media bytes. Unauthenticated.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Uploads a still image and returns its blob reference.
    async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef>;

    /// Looks up the content identifier of the record at `uri`.
    async fn resolve_quote_cid(&self, uri: &str) -> Result<String>;

    /// Creates a post quoting `quoted_uri` with an image attached. Returns the new post URI.
    async fn create_quote_post(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        media: &BlobRef,
        alt_text: &str,
    ) -> Result<String>;

    /// Submits a video of type `content_type` for encoding and returns the job id.
    async fn upload_video(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String>;

    /// Waits for an encoding job to finish and returns the video blob reference.
    async fn poll_video_job(&self, job_id: &str) -> Result<BlobRef>;

    /// Creates a post quoting `quoted_uri` with a video attached. Returns the new post URI.
    async fn create_quote_post_with_video(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        video: &BlobRef,
        alt_text: &str,
    ) -> Result<String>;
}

#[async_trait]
impl SocialApi for SocialClient {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        SocialClient::fetch_bytes(self, url).await
    }

    async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef> {
        SocialClient::upload_blob(self, bytes, content_type).await
    }

    async fn resolve_quote_cid(&self, uri: &str) -> Result<String> {
        SocialClient::resolve_quote_cid(self, uri).await
    }

    async fn create_quote_post(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        media: &BlobRef,
        alt_text: &str,
    ) -> Result<String> {
        SocialClient::create_quote_post(self, quoted_uri, quoted_cid, media, alt_text).await
    }

    async fn upload_video(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String> {
        SocialClient::upload_video(self, bytes, filename, content_type).await
    }

    async fn poll_video_job(&self, job_id: &str) -> Result<BlobRef> {
        SocialClient::poll_video_job(self, job_id).await
    }

    async fn create_quote_post_with_video(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        video: &BlobRef,
        alt_text: &str,
    ) -> Result<String> {
        SocialClient::create_quote_post_with_video(self, quoted_uri, quoted_cid, video, alt_text)
            .await
    }
}
