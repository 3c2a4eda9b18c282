//! Video upload and encoding job lifecycle.
//!
//! Videos are not uploaded to the PDS directly. The client exchanges its session
//! for a short-lived service auth token, submits the bytes to the video service,
//! and then polls the resulting job, with a second token for the video service,
//! until it completes, fails, or runs out of attempts.

use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use super::api::{build_bearer_header, SocialClient};
use super::BlobRef;
use crate::error::{BotError, Result};

/// Lexicon method the service token is scoped to for video uploads.
const UPLOAD_BLOB_LXM: &str = "com.atproto.repo.uploadBlob";

/// Lexicon method the service token is scoped to for job status polls.
const JOB_STATUS_LXM: &str = "app.bsky.video.getJobStatus";

/// Lifetime requested for service auth tokens, in seconds.
const SERVICE_TOKEN_TTL_SECS: i64 = 30 * 60;

const STATE_COMPLETED: &str = "JOB_STATE_COMPLETED";
const STATE_FAILED: &str = "JOB_STATE_FAILED";

/// Polling cadence for encoding jobs.
#[derive(Debug, Clone, Copy)]
pub struct VideoPollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for VideoPollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

/// Where an encoding job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoJobState {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

/// Status report from `app.bsky.video.getJobStatus`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub blob: Option<BlobRef>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResponse {
    job_status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct ServiceAuthResponse {
    token: Option<String>,
}

/// One encoding job and what has been observed about it.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub job_id: String,
    pub state: VideoJobState,
    pub attempts: u32,
    pub media: Option<BlobRef>,
    pub failure: Option<String>,
}

impl VideoJob {
    pub fn submitted(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: VideoJobState::Submitted,
            attempts: 0,
            media: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            VideoJobState::Completed | VideoJobState::Failed | VideoJobState::TimedOut
        )
    }

    /// Applies one status report.
    ///
    /// A completed report without a blob is treated as a failure, since there is
    /// nothing to embed.
    pub fn observe(&mut self, status: &JobStatus) {
        if self.is_terminal() {
            return;
        }
        self.attempts += 1;
        match status.state.as_str() {
            STATE_COMPLETED => match &status.blob {
                Some(blob) => {
                    self.media = Some(blob.clone());
                    self.state = VideoJobState::Completed;
                }
                None => {
                    self.failure = Some("job completed without a blob".to_string());
                    self.state = VideoJobState::Failed;
                }
            },
            STATE_FAILED => {
                self.failure = Some(
                    status
                        .error
                        .clone()
                        .or_else(|| status.message.clone())
                        .unwrap_or_else(|| "job failed".to_string()),
                );
                self.state = VideoJobState::Failed;
            }
            _ => self.state = VideoJobState::Polling,
        }
    }

    /// Counts a poll that produced no usable status.
    pub fn observe_error(&mut self) {
        if !self.is_terminal() {
            self.attempts += 1;
            self.state = VideoJobState::Polling;
        }
    }

    /// Marks the job timed out once `max_attempts` polls have been spent.
    pub fn check_budget(&mut self, max_attempts: u32) {
        if !self.is_terminal() && self.attempts >= max_attempts {
            self.state = VideoJobState::TimedOut;
        }
    }

    /// Converts a terminal job into the media reference or the matching error.
    pub fn into_result(self) -> Result<BlobRef> {
        match self.state {
            VideoJobState::Completed => self.media.ok_or_else(|| {
                BotError::VideoProcessingFailure("job completed without a blob".to_string())
            }),
            VideoJobState::Failed => Err(BotError::VideoProcessingFailure(
                self.failure.unwrap_or_else(|| "job failed".to_string()),
            )),
            VideoJobState::TimedOut => Err(BotError::VideoTimeout {
                attempts: self.attempts,
            }),
            VideoJobState::Submitted | VideoJobState::Polling => Err(BotError::VideoTimeout {
                attempts: self.attempts,
            }),
        }
    }
}

/// Pulls `jobId` out of an upload response, wrapped or not.
pub(crate) fn extract_job_id(body: &serde_json::Value) -> Option<String> {
    body.get("jobId")
        .or_else(|| body.get("jobStatus").and_then(|s| s.get("jobId")))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl SocialClient {
    /// Exchanges the session token for a short-lived service token.
    ///
    /// # Parameters
    ///
    /// - `aud`: DID of the service that will accept the token
    /// - `lxm`: Lexicon method the token is scoped to
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The service token, valid for 30 minutes
    ///
    /// # Errors
    ///
    /// - `BotError::NotLoggedIn` before login
    /// - `BotError::ServiceAuthFailure` when no token is issued
    pub async fn get_service_auth_token(&self, aud: &str, lxm: &str) -> Result<String> {
        let session = self.session()?;
        let exp = Utc::now().timestamp() + SERVICE_TOKEN_TTL_SECS;
        let url = format!(
            "{}?aud={}&lxm={}&exp={}",
            Self::pds_xrpc(session, "com.atproto.server.getServiceAuth"),
            urlencoding::encode(aud),
            urlencoding::encode(lxm),
            exp
        );
        debug!("Requesting service token for {} scoped to {}", aud, lxm);

        let body = self
            .execute(self.authorize(self.http.get(&url))?, "get_service_auth")
            .await
            .map_err(|f| BotError::ServiceAuthFailure(f.to_string()))?;

        let response: ServiceAuthResponse = serde_json::from_str(&body).map_err(|e| {
            BotError::ServiceAuthFailure(format!("malformed service auth response: {}", e))
        })?;
        response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BotError::ServiceAuthFailure("response has no token".to_string()))
    }

    /// Submits a video for encoding.
    ///
    /// The upload is authorized with a token for the account's PDS scoped to
    /// `com.atproto.repo.uploadBlob`. A conflict response that names an existing
    /// job for the same bytes is accepted as success.
    ///
    /// # Parameters
    ///
    /// - `bytes`: The raw video
    /// - `filename`: Name the video service records for the upload
    /// - `content_type`: MIME type of the video, e.g. `video/mp4`
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The encoding job id
    ///
    /// # Errors
    ///
    /// - `BotError::NotLoggedIn` before login
    /// - `BotError::ServiceAuthFailure` if no upload token can be obtained
    /// - `BotError::VideoUploadFailure` when the video service rejects the upload
    pub async fn upload_video(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String> {
        let session = self.session()?;
        let token = self
            .get_service_auth_token(&format!("did:web:{}", session.pds_host), UPLOAD_BLOB_LXM)
            .await?;

        let url = format!(
            "{}/xrpc/app.bsky.video.uploadVideo?did={}&name={}",
            self.endpoints.video_service,
            urlencoding::encode(&session.actor_id),
            urlencoding::encode(filename)
        );
        info!(
            "Uploading {} byte video {} ({})",
            bytes.len(),
            filename,
            content_type
        );

        let request = self
            .http
            .post(&url)
            .header("Authorization", build_bearer_header(&token))
            .header("Content-Type", content_type)
            .body(bytes);

        let body = match self.execute(request, "upload_video").await {
            Ok(body) => body,
            Err(failure) if failure.status == Some(StatusCode::CONFLICT) => {
                debug!("Video already uploaded, reusing existing job");
                failure.body
            }
            Err(failure) => return Err(BotError::VideoUploadFailure(failure.to_string())),
        };

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            BotError::VideoUploadFailure(format!("malformed upload response: {}", e))
        })?;
        let job_id = extract_job_id(&value)
            .ok_or_else(|| BotError::VideoUploadFailure("upload response has no jobId".to_string()))?;

        info!("Video job {} submitted", job_id);
        Ok(job_id)
    }

    /// Polls an encoding job until it completes, fails, or the attempt budget runs out.
    ///
    /// One service token for the video service, scoped to
    /// `app.bsky.video.getJobStatus`, authorizes every poll. A poll that fails or
    /// returns an unreadable status still counts as an attempt.
    ///
    /// # Parameters
    ///
    /// - `job_id`: The id returned by [`upload_video`](Self::upload_video)
    ///
    /// # Returns
    ///
    /// - `Ok(BlobRef)`: The encoded video, ready to embed
    ///
    /// # Errors
    ///
    /// - `BotError::NotLoggedIn` before login
    /// - `BotError::ServiceAuthFailure` if no status token can be obtained
    /// - `BotError::VideoProcessingFailure` when the job fails
    /// - `BotError::VideoTimeout` after `max_attempts` polls without a terminal state
    pub async fn poll_video_job(&self, job_id: &str) -> Result<BlobRef> {
        self.session()?;
        let token = self
            .get_service_auth_token(&self.endpoints.video_service_did, JOB_STATUS_LXM)
            .await?;

        let settings = self.video_poll;
        let url = format!(
            "{}/xrpc/app.bsky.video.getJobStatus?jobId={}",
            self.endpoints.video_service,
            urlencoding::encode(job_id)
        );

        let mut job = VideoJob::submitted(job_id);
        while !job.is_terminal() {
            tokio::time::sleep(settings.interval).await;

            let request = self
                .http
                .get(&url)
                .header("Authorization", build_bearer_header(&token));
            match self.execute(request, "get_job_status").await {
                Ok(body) => match serde_json::from_str::<JobStatusResponse>(&body) {
                    Ok(response) => {
                        debug!(
                            "Video job {} state {} progress {:?}",
                            job_id, response.job_status.state, response.job_status.progress
                        );
                        job.observe(&response.job_status);
                    }
                    Err(e) => {
                        warn!("Malformed status for video job {}: {}", job_id, e);
                        job.observe_error();
                    }
                },
                Err(failure) => {
                    warn!("Status poll for video job {} failed: {}", job_id, failure);
                    job.observe_error();
                }
            }

            job.check_budget(settings.max_attempts);
        }

        match job.state {
            VideoJobState::Completed => info!("Video job {} completed", job_id),
            VideoJobState::TimedOut => error!(
                "Video job {} did not finish after {} polls",
                job_id, job.attempts
            ),
            _ => error!(
                "Video job {} failed: {}",
                job_id,
                job.failure.as_deref().unwrap_or("unknown error")
            ),
        }
        job.into_result()
    }
}
