//! Configuration module for the bufo bot.
//!
//! This module contains the bot configuration structure and the environment
//! variable handling used to build it. A `.env` file in the working directory is
//! loaded by the binaries before [`BotConfig::from_env`] runs.

use log::{debug, info, warn};
use std::env;
use std::time::Duration;

use crate::error::{BotError, Result};

/// Default Jetstream host.
pub const DEFAULT_JETSTREAM_ENDPOINT: &str = "jetstream2.us-east.bsky.network";

/// Default catalog source (the find-bufo search API).
pub const DEFAULT_CATALOG_URL: &str = "https://find-bufo.com/api/search?query=bufo&top_k=2000&alpha=0";

/// Largest accepted cooldown, one year in minutes.
pub const MAX_COOLDOWN_MINUTES: i64 = 366 * 24 * 60;

/// Names matching any of these patterns are never posted.
pub const DEFAULT_EXCLUDE_PATTERNS: &str =
    "what-have-you-done,what-have-i-done,sad,crying,cant-take";

/// Runtime configuration for the bot.
///
/// Every field has a default except the account credentials, which are only
/// required when posting is enabled.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Account handle used to create the session
    pub handle: String,
    /// App password for the account
    pub app_password: String,
    /// Jetstream host, without scheme
    pub jetstream_endpoint: String,
    /// Minimum number of words in a phrase for it to be matchable
    pub min_phrase_words: usize,
    /// Must be explicitly enabled to post
    pub posting_enabled: bool,
    /// Do not repost the same entry within this many minutes
    pub cooldown_minutes: i64,
    /// Catalog entries whose name matches any of these regexes are dropped
    pub exclude_patterns: Vec<String>,
    /// Reserved. Parsed and validated, not used by the posting logic.
    pub quote_chance: f64,
    /// Catalog source URL
    pub catalog_url: String,
    /// Deadline applied to every outbound HTTP request
    pub http_timeout: Duration,
    /// Reconnect when the firehose is silent for this long
    pub stream_idle_timeout: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            handle: String::new(),
            app_password: String::new(),
            jetstream_endpoint: DEFAULT_JETSTREAM_ENDPOINT.to_string(),
            min_phrase_words: 4,
            posting_enabled: false,
            cooldown_minutes: 120,
            exclude_patterns: split_patterns(DEFAULT_EXCLUDE_PATTERNS),
            quote_chance: 0.5,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            http_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

impl BotConfig {
    /// Creates a new `BotConfig` from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `BSKY_HANDLE`, `BSKY_APP_PASSWORD`: required when `POSTING_ENABLED` is true
    /// - `JETSTREAM_ENDPOINT`, `MIN_PHRASE_WORDS`, `POSTING_ENABLED`, `COOLDOWN_MINUTES`,
    ///   `EXCLUDE_PATTERNS`, `QUOTE_CHANCE`, `CATALOG_URL`, `HTTP_TIMEOUT_SECS`,
    ///   `STREAM_IDLE_TIMEOUT_SECS`: optional
    ///
    /// # Errors
    ///
    /// Returns `BotError::Config` when a value cannot be parsed or a credential
    /// required for posting is missing.
    pub fn from_env() -> Result<Self> {
        info!("Loading bot configuration from environment variables");
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let posting_enabled = match get("POSTING_ENABLED") {
            Some(v) => parse_bool("POSTING_ENABLED", &v)?,
            None => defaults.posting_enabled,
        };

        let handle = get("BSKY_HANDLE").unwrap_or_default();
        let app_password = get("BSKY_APP_PASSWORD").unwrap_or_default();

        if posting_enabled {
            if handle.is_empty() {
                return Err(BotError::config(
                    "BSKY_HANDLE must be set when POSTING_ENABLED is true",
                ));
            }
            if app_password.is_empty() {
                return Err(BotError::config(
                    "BSKY_APP_PASSWORD must be set when POSTING_ENABLED is true",
                ));
            }
            info!("Found BSKY_HANDLE: {}", handle);
            debug!("App password (masked): {}", mask_secret(&app_password));
        } else if !handle.is_empty() {
            info!("Found BSKY_HANDLE: {} (posting disabled)", handle);
        }

        let min_phrase_words = match get("MIN_PHRASE_WORDS") {
            Some(v) => parse_number::<usize>("MIN_PHRASE_WORDS", &v)?,
            None => defaults.min_phrase_words,
        };
        if min_phrase_words == 0 {
            return Err(BotError::config("MIN_PHRASE_WORDS must be at least 1"));
        }

        let cooldown_minutes = match get("COOLDOWN_MINUTES") {
            Some(v) => parse_number::<i64>("COOLDOWN_MINUTES", &v)?,
            None => defaults.cooldown_minutes,
        };
        if !(0..=MAX_COOLDOWN_MINUTES).contains(&cooldown_minutes) {
            return Err(BotError::config(format!(
                "COOLDOWN_MINUTES must be between 0 and {}, got {}",
                MAX_COOLDOWN_MINUTES, cooldown_minutes
            )));
        }

        let exclude_patterns = match lookup("EXCLUDE_PATTERNS") {
            Some(v) => split_patterns(&v),
            None => defaults.exclude_patterns,
        };
        for pattern in &exclude_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                BotError::config(format!("invalid EXCLUDE_PATTERNS entry '{}': {}", pattern, e))
            })?;
        }

        let quote_chance = match get("QUOTE_CHANCE") {
            Some(v) => {
                warn!("QUOTE_CHANCE is reserved and currently has no effect");
                parse_number::<f64>("QUOTE_CHANCE", &v)?
            }
            None => defaults.quote_chance,
        };
        if !(0.0..=1.0).contains(&quote_chance) {
            return Err(BotError::config(format!(
                "QUOTE_CHANCE must be between 0.0 and 1.0, got {}",
                quote_chance
            )));
        }

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number::<u64>("HTTP_TIMEOUT_SECS", &v)?),
            None => defaults.http_timeout,
        };

        let stream_idle_timeout = match get("STREAM_IDLE_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number::<u64>("STREAM_IDLE_TIMEOUT_SECS", &v)?),
            None => defaults.stream_idle_timeout,
        };

        let config = BotConfig {
            handle,
            app_password,
            jetstream_endpoint: get("JETSTREAM_ENDPOINT").unwrap_or(defaults.jetstream_endpoint),
            min_phrase_words,
            posting_enabled,
            cooldown_minutes,
            exclude_patterns,
            quote_chance,
            catalog_url: get("CATALOG_URL").unwrap_or(defaults.catalog_url),
            http_timeout,
            stream_idle_timeout,
        };

        info!(
            "Configuration loaded: endpoint={}, min_phrase_words={}, posting_enabled={}, cooldown={}m, {} exclude patterns",
            config.jetstream_endpoint,
            config.min_phrase_words,
            config.posting_enabled,
            config.cooldown_minutes,
            config.exclude_patterns.len()
        );
        if !config.posting_enabled {
            warn!("Posting is disabled - matches will only be logged");
        }

        Ok(config)
    }

    /// The cooldown window as a chrono duration.
    ///
    /// Values outside `0..=MAX_COOLDOWN_MINUTES` are clamped into that range.
    pub fn cooldown_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes.clamp(0, MAX_COOLDOWN_MINUTES))
    }
}

/// Masks a secret for logging, keeping only a short prefix.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() > 4 {
        format!("{}...", prefix)
    } else {
        "...".to_string()
    }
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BotError::config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| BotError::config(format!("{} is not a valid number ('{}'): {}", key, value, e)))
}
