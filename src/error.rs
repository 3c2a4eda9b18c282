//! Error types for the bufo bot.
//!
//! Every fallible operation in the crate returns [`BotError`]. The variants follow
//! the steps of the posting workflow so a log line names exactly which step failed.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, BotError>;

/// Errors that can occur while loading configuration, consuming the firehose or posting.
#[derive(Error, Debug)]
pub enum BotError {
    /// Invalid or missing configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Catalog could not be fetched or parsed
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Firehose connection, handshake or receive failure
    #[error("stream error: {0}")]
    Stream(String),

    /// Session creation rejected or response missing fields
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// PDS endpoint could not be resolved from the DID document
    #[error("directory lookup failed: {0}")]
    DirectoryFailure(String),

    /// An authenticated call was attempted before a session existed
    #[error("not logged in")]
    NotLoggedIn,

    /// Media download failed
    #[error("media fetch failed: {0}")]
    FetchFailure(String),

    /// Blob upload failed
    #[error("blob upload failed: {0}")]
    UploadFailure(String),

    /// Quoted record could not be looked up
    #[error("record lookup failed: {0}")]
    RecordLookupFailure(String),

    /// Post record creation failed
    #[error("post creation failed: {0}")]
    PostFailure(String),

    /// Service auth token could not be issued
    #[error("service auth failed: {0}")]
    ServiceAuthFailure(String),

    /// Video upload to the encoding service failed
    #[error("video upload failed: {0}")]
    VideoUploadFailure(String),

    /// Video job reached the failed state
    #[error("video processing failed: {0}")]
    VideoProcessingFailure(String),

    /// Video job never reached a terminal state
    #[error("video processing timed out after {attempts} polls")]
    VideoTimeout { attempts: u32 },

    /// Transport error from the HTTP client
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a stream error.
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }
}
