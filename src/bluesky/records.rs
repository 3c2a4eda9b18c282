//! Blob upload and post record operations.
//!
//! This module contains the quote-post workflow calls: uploading an image blob,
//! looking up the CID of the post being quoted, and creating the quote post
//! record with its embed.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

use super::api::SocialClient;
use super::{BlobRef, POST_COLLECTION};
use crate::error::{BotError, Result};

/// The parts of an `at://` record URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
}

/// Splits `at://{repo}/{collection}/{rkey}`. Returns `None` for any other shape.
pub fn parse_at_uri(uri: &str) -> Option<AtUri> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.split('/');
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let collection = parts.next().filter(|s| !s.is_empty())?;
    let rkey = parts.next().filter(|s| !s.is_empty())?;
    if parts.next().is_some() {
        return None;
    }
    Some(AtUri {
        repo: repo.to_string(),
        collection: collection.to_string(),
        rkey: rkey.to_string(),
    })
}

/// `app.bsky.embed.images` with a single image.
pub fn images_embed(blob: &BlobRef, alt_text: &str) -> Value {
    json!({
        "$type": "app.bsky.embed.images",
        "images": [
            {
                "image": blob,
                "alt": alt_text,
            }
        ]
    })
}

/// `app.bsky.embed.video`.
pub fn video_embed(blob: &BlobRef, alt_text: &str) -> Value {
    json!({
        "$type": "app.bsky.embed.video",
        "video": blob,
        "alt": alt_text,
    })
}

/// An empty-text post embedding the quoted record alongside `media`.
///
/// # Parameters
///
/// - `quoted_uri`, `quoted_cid`: Strong reference to the post being quoted
/// - `media`: An `app.bsky.embed.images` or `app.bsky.embed.video` embed
/// - `created_at`: Record timestamp, written with millisecond precision
///
/// # Returns
///
/// The `app.bsky.feed.post` record as JSON
pub fn quote_post_record(
    quoted_uri: &str,
    quoted_cid: &str,
    media: Value,
    created_at: DateTime<Utc>,
) -> Value {
    json!({
        "$type": POST_COLLECTION,
        "text": "",
        "createdAt": created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "embed": {
            "$type": "app.bsky.embed.recordWithMedia",
            "record": {
                "$type": "app.bsky.embed.record",
                "record": {
                    "uri": quoted_uri,
                    "cid": quoted_cid,
                }
            },
            "media": media,
        }
    })
}

#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: Option<BlobRef>,
}

#[derive(Debug, Deserialize)]
struct GetRecordResponse {
    cid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: Option<String>,
}

impl SocialClient {
    /// Uploads bytes to the PDS as a blob.
    ///
    /// # Parameters
    ///
    /// - `bytes`: The raw image
    /// - `content_type`: MIME type sent with the upload, e.g. `image/gif`
    ///
    /// # Returns
    ///
    /// - `Ok(BlobRef)`: The blob reference exactly as the PDS returned it
    ///
    /// # Errors
    ///
    /// - `BotError::NotLoggedIn` before login
    /// - `BotError::UploadFailure` on any failed or malformed response
    pub async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef> {
        let session = self.session()?;
        let url = Self::pds_xrpc(session, "com.atproto.repo.uploadBlob");
        info!("Uploading {} byte blob ({})", bytes.len(), content_type);

        let request = self
            .authorize(self.http.post(&url))?
            .header("Content-Type", content_type)
            .body(bytes);

        let body = self
            .execute(request, "upload_blob")
            .await
            .map_err(|f| BotError::UploadFailure(f.to_string()))?;

        let response: UploadBlobResponse = serde_json::from_str(&body)
            .map_err(|e| BotError::UploadFailure(format!("malformed upload response: {}", e)))?;
        response
            .blob
            .ok_or_else(|| BotError::UploadFailure("upload response has no blob".to_string()))
    }

    /// Looks up the CID of the record at `uri`.
    ///
    /// # Parameters
    ///
    /// - `uri`: An `at://{repo}/{collection}/{rkey}` record URI
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The record's current CID
    ///
    /// # Errors
    ///
    /// - `BotError::NotLoggedIn` before login
    /// - `BotError::RecordLookupFailure` for a malformed URI or a failed lookup
    pub async fn resolve_quote_cid(&self, uri: &str) -> Result<String> {
        let session = self.session()?;
        let at_uri = parse_at_uri(uri)
            .ok_or_else(|| BotError::RecordLookupFailure(format!("malformed record URI: {}", uri)))?;

        let url = format!(
            "{}?repo={}&collection={}&rkey={}",
            Self::pds_xrpc(session, "com.atproto.repo.getRecord"),
            urlencoding::encode(&at_uri.repo),
            urlencoding::encode(&at_uri.collection),
            urlencoding::encode(&at_uri.rkey),
        );
        debug!("Resolving CID for {}", uri);

        let body = self
            .execute(self.authorize(self.http.get(&url))?, "get_record")
            .await
            .map_err(|f| BotError::RecordLookupFailure(f.to_string()))?;

        let response: GetRecordResponse = serde_json::from_str(&body).map_err(|e| {
            BotError::RecordLookupFailure(format!("malformed record response: {}", e))
        })?;
        response
            .cid
            .filter(|cid| !cid.is_empty())
            .ok_or_else(|| BotError::RecordLookupFailure(format!("record {} has no cid", uri)))
    }

    /// Creates a quote post with an image embed.
    ///
    /// # Parameters
    ///
    /// - `quoted_uri`, `quoted_cid`: The post being quoted
    /// - `media`: Blob reference from [`upload_blob`](Self::upload_blob)
    /// - `alt_text`: Alt text for the image
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: URI of the new post
    ///
    /// # Errors
    ///
    /// - `BotError::NotLoggedIn` before login
    /// - `BotError::PostFailure` when the record is rejected
    pub async fn create_quote_post(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        media: &BlobRef,
        alt_text: &str,
    ) -> Result<String> {
        let record = quote_post_record(
            quoted_uri,
            quoted_cid,
            images_embed(media, alt_text),
            Utc::now(),
        );
        self.create_post_record(record, "create_quote_post").await
    }

    /// Creates a quote post with a video embed.
    ///
    /// # Parameters
    ///
    /// - `quoted_uri`, `quoted_cid`: The post being quoted
    /// - `video`: Blob reference from [`poll_video_job`](Self::poll_video_job)
    /// - `alt_text`: Alt text for the video
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: URI of the new post
    ///
    /// # Errors
    ///
    /// - `BotError::NotLoggedIn` before login
    /// - `BotError::PostFailure` when the record is rejected
    pub async fn create_quote_post_with_video(
        &self,
        quoted_uri: &str,
        quoted_cid: &str,
        video: &BlobRef,
        alt_text: &str,
    ) -> Result<String> {
        let record = quote_post_record(
            quoted_uri,
            quoted_cid,
            video_embed(video, alt_text),
            Utc::now(),
        );
        self.create_post_record(record, "create_quote_post_with_video")
            .await
    }

    async fn create_post_record(&self, record: Value, operation: &str) -> Result<String> {
        let session = self.session()?;
        let url = Self::pds_xrpc(session, "com.atproto.repo.createRecord");
        let payload = json!({
            "repo": session.actor_id,
            "collection": POST_COLLECTION,
            "record": record,
        });
        debug!("Create record payload: {}", payload);

        let body = self
            .execute(self.authorize(self.http.post(&url))?.json(&payload), operation)
            .await
            .map_err(|f| BotError::PostFailure(f.to_string()))?;

        let response: CreateRecordResponse = serde_json::from_str(&body)
            .map_err(|e| BotError::PostFailure(format!("malformed create response: {}", e)))?;
        response
            .uri
            .ok_or_else(|| BotError::PostFailure("create response has no uri".to_string()))
    }
}
