//! Core Bluesky API utilities.
//!
//! This module contains the client and session types, session creation with PDS
//! resolution, and the low-level helper every XRPC call goes through.

use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use url::Url;

use super::video::VideoPollSettings;
use crate::config::mask_secret;
use crate::error::{BotError, Result};

/// Base URLs of the services the client talks to.
///
/// The PDS is not listed here: it is resolved per account at login.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Where sessions are created
    pub entryway: String,
    /// PLC directory used to resolve `did:plc` identities
    pub plc_directory: String,
    /// Video upload and encoding service
    pub video_service: String,
    /// Service DID of the video service, the audience of its status tokens
    pub video_service_did: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            entryway: "https://bsky.social".to_string(),
            plc_directory: "https://plc.directory".to_string(),
            video_service: "https://video.bsky.app".to_string(),
            video_service_did: "did:web:video.bsky.app".to_string(),
        }
    }
}

/// An authenticated session. Created once by [`SocialClient::login`] and never refreshed.
#[derive(Clone)]
pub struct Session {
    /// Bearer token for PDS calls
    pub access_token: String,
    /// DID of the logged-in account
    pub actor_id: String,
    /// Hostname of the account's PDS
    pub pds_host: String,
    /// Base URL of the PDS, without trailing slash
    pub pds_url: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &mask_secret(&self.access_token))
            .field("actor_id", &self.actor_id)
            .field("pds_host", &self.pds_host)
            .field("pds_url", &self.pds_url)
            .finish()
    }
}

/// Client for the Bluesky XRPC API.
pub struct SocialClient {
    pub(super) http: Client,
    pub(super) endpoints: Endpoints,
    pub(super) video_poll: VideoPollSettings,
    handle: String,
    app_password: String,
    session: Option<Session>,
}

/// A failed XRPC call, before it is mapped to the error variant of the calling operation.
#[derive(Debug)]
pub(crate) struct CallFailure {
    pub status: Option<StatusCode>,
    pub body: String,
    message: String,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    access_jwt: Option<String>,
    did: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidService {
    #[serde(default)]
    id: String,
    #[serde(default)]
    service_endpoint: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default)]
    service: Vec<DidService>,
}

/// Sanitizes text for safe logging by truncating and escaping control characters.
///
/// Newlines and tabs become spaces, other control characters become `?`, and
/// anything past `max_len` characters is cut with a note of the original size.
///
/// # Parameters
///
/// - `text`: The text to sanitize, usually a post or a response body
/// - `max_len`: Maximum number of characters before truncation
///
/// # Returns
///
/// A single-line string safe for logging
pub(crate) fn sanitize_for_logging(text: &str, max_len: usize) -> String {
    let sanitized: String = text
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            c if c.is_control() => '?',
            c => c,
        })
        .collect();

    if sanitized.chars().count() > max_len {
        let truncated: String = sanitized.chars().take(max_len).collect();
        format!("{}... [truncated, {} total bytes]", truncated, text.len())
    } else {
        sanitized
    }
}

/// Builds the Authorization header value for a bearer token.
pub(crate) fn build_bearer_header(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Finds the `#atproto_pds` service in a DID document and returns its endpoint.
pub(crate) fn find_pds_endpoint(document: &serde_json::Value) -> Option<String> {
    let document: DidDocument = serde_json::from_value(document.clone()).ok()?;
    document
        .service
        .into_iter()
        .find(|s| s.id.ends_with("#atproto_pds"))
        .and_then(|s| s.service_endpoint)
        .and_then(|v| v.as_str().map(str::to_string))
}

/// Location of the DID document for a `did:web` identity.
pub(crate) fn did_web_document_url(did: &str) -> Option<String> {
    let domain = did.strip_prefix("did:web:")?;
    if domain.is_empty() || domain.contains(':') {
        // path-based did:web identities are not valid for atproto accounts
        return None;
    }
    let domain = urlencoding::decode(domain).ok()?;
    Some(format!("https://{}/.well-known/did.json", domain))
}

impl SocialClient {
    /// Creates a client with the default endpoints.
    ///
    /// No request is made until [`login`](Self::login).
    ///
    /// # Parameters
    ///
    /// - `handle`: Account handle, e.g. `bufo.bsky.social`
    /// - `app_password`: App password for the account
    /// - `timeout`: Deadline applied to every request
    ///
    /// # Errors
    ///
    /// Returns `BotError::Http` if the underlying HTTP client cannot be built.
    pub fn new(
        handle: impl Into<String>,
        app_password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(concat!("bufo-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoints: Endpoints::default(),
            video_poll: VideoPollSettings::default(),
            handle: handle.into(),
            app_password: app_password.into(),
            session: None,
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_video_poll(mut self, settings: VideoPollSettings) -> Self {
        self.video_poll = settings;
        self
    }

    /// The current session, or `BotError::NotLoggedIn`.
    pub fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(BotError::NotLoggedIn)
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Creates a session and resolves the account's PDS.
    ///
    /// On success every authenticated operation uses the new session until the
    /// process exits.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The session is stored on the client
    ///
    /// # Errors
    ///
    /// - `BotError::AuthFailure`: the entryway rejected the credentials or the
    ///   response lacked `accessJwt` or `did`
    /// - `BotError::DirectoryFailure`: the DID document could not be fetched or has
    ///   no `#atproto_pds` service
    pub async fn login(&mut self) -> Result<()> {
        info!("Creating session for {}", self.handle);
        debug!("App password (masked): {}", mask_secret(&self.app_password));

        let url = format!(
            "{}/xrpc/com.atproto.server.createSession",
            self.endpoints.entryway
        );
        let payload = json!({
            "identifier": self.handle,
            "password": self.app_password,
        });

        let body = self
            .execute(self.http.post(&url).json(&payload), "create_session")
            .await
            .map_err(|f| BotError::AuthFailure(f.to_string()))?;

        let created: CreateSessionResponse = serde_json::from_str(&body)
            .map_err(|e| BotError::AuthFailure(format!("malformed session response: {}", e)))?;

        let (access_token, actor_id) = match (created.access_jwt, created.did) {
            (Some(token), Some(did)) if !token.is_empty() && !did.is_empty() => (token, did),
            _ => {
                error!("Session response is missing accessJwt or did");
                return Err(BotError::AuthFailure(
                    "session response is missing accessJwt or did".to_string(),
                ));
            }
        };

        let (pds_url, pds_host) = self.resolve_pds(&actor_id).await?;

        info!(
            "Logged in as {} ({}), PDS host {}",
            self.handle, actor_id, pds_host
        );
        self.session = Some(Session {
            access_token,
            actor_id,
            pds_host,
            pds_url,
        });
        Ok(())
    }

    /// Resolves the PDS base URL and host for `did` through the public directory.
    async fn resolve_pds(&self, did: &str) -> Result<(String, String)> {
        let document_url = if did.starts_with("did:plc:") {
            format!("{}/{}", self.endpoints.plc_directory, did)
        } else if let Some(url) = did_web_document_url(did) {
            url
        } else {
            return Err(BotError::DirectoryFailure(format!(
                "unsupported DID method: {}",
                did
            )));
        };

        info!("Resolving PDS for {} via {}", did, document_url);

        let body = self
            .execute(self.http.get(&document_url), "resolve_did")
            .await
            .map_err(|f| BotError::DirectoryFailure(f.to_string()))?;
        let document: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BotError::DirectoryFailure(format!("malformed DID document: {}", e)))?;

        let endpoint = find_pds_endpoint(&document).ok_or_else(|| {
            error!("DID document for {} has no #atproto_pds service", did);
            BotError::DirectoryFailure(format!("no #atproto_pds service for {}", did))
        })?;

        let parsed = Url::parse(&endpoint).map_err(|e| {
            BotError::DirectoryFailure(format!("invalid PDS endpoint '{}': {}", endpoint, e))
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| {
                BotError::DirectoryFailure(format!("PDS endpoint '{}' has no host", endpoint))
            })?
            .to_string();

        Ok((endpoint.trim_end_matches('/').to_string(), host))
    }

    /// Downloads `url` without authentication.
    ///
    /// # Parameters
    ///
    /// - `url`: Media location from the catalog
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<u8>)`: The response body
    ///
    /// # Errors
    ///
    /// Returns `BotError::FetchFailure` on transport failure or a non-success status.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BotError::FetchFailure(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::FetchFailure(format!("GET {} returned {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BotError::FetchFailure(format!("reading {} failed: {}", url, e)))?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    /// URL of an XRPC method on the session's PDS.
    pub(super) fn pds_xrpc(session: &Session, nsid: &str) -> String {
        format!("{}/xrpc/{}", session.pds_url, nsid)
    }

    /// Attaches the session's bearer token to a request.
    pub(super) fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let session = self.session()?;
        Ok(request.header("Authorization", build_bearer_header(&session.access_token)))
    }

    /// Sends a request and returns the response body when the status is a success.
    ///
    /// A 401 is logged as a probable session expiry. Sessions are not refreshed,
    /// so every later authenticated call will fail the same way.
    ///
    /// # Parameters
    ///
    /// - `request`: A configured request ready to send
    /// - `operation`: Human-readable name for the operation (for logging)
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The response body on a success status
    /// - `Err(CallFailure)`: The status and body of a failed call, or the transport error
    pub(crate) async fn execute(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> std::result::Result<String, CallFailure> {
        debug!("Sending request for operation: {}", operation);

        let response = request.send().await.map_err(|e| {
            error!("Operation '{}' failed to send: {}", operation, e);
            CallFailure {
                status: None,
                body: String::new(),
                message: format!("{} request failed: {}", operation, e),
            }
        })?;

        let status = response.status();
        debug!(
            "Received response with status: {} for operation: {}",
            status, operation
        );

        let body = response.text().await.map_err(|e| CallFailure {
            status: Some(status),
            body: String::new(),
            message: format!("{} response could not be read: {}", operation, e),
        })?;

        if status.is_success() {
            debug!(
                "Response summary for '{}': {} bytes received",
                operation,
                body.len()
            );
            return Ok(body);
        }

        if status == StatusCode::UNAUTHORIZED {
            warn!(
                "Received 401 Unauthorized for operation '{}' - the session may have expired and is not refreshed",
                operation
            );
        }

        error!("Operation '{}' failed - Status: {}", operation, status);
        debug!(
            "Error response for '{}': {}",
            operation,
            sanitize_for_logging(&body, 200)
        );

        Err(CallFailure {
            status: Some(status),
            message: format!(
                "{} returned {}: {}",
                operation,
                status,
                sanitize_for_logging(&body, 200)
            ),
            body,
        })
    }
}
