//! Catalog loading.
//!
//! The catalog is fetched once at startup from the find-bufo search API and then
//! filtered through the configured exclude patterns before the phrase index is built.

use log::{debug, error, info};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{BotError, Result};

/// One catalog item as returned by the search service, before phrase derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Source filename, e.g. `bufo-hop-in-we-re-going.gif`
    pub name: String,
    /// Where the media can be downloaded from
    pub url: String,
}

impl RawEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    name: Option<String>,
    url: Option<String>,
}

/// Parses a search response body into raw entries.
///
/// Results missing a name or url are dropped.
pub fn parse_catalog(body: &str) -> Result<Vec<RawEntry>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| BotError::Catalog(format!("malformed catalog response: {}", e)))?;

    Ok(response
        .results
        .into_iter()
        .filter_map(|r| match (r.name, r.url) {
            (Some(name), Some(url)) if !name.is_empty() && !url.is_empty() => {
                Some(RawEntry { name, url })
            }
            _ => None,
        })
        .collect())
}

/// Fetches the full catalog from the search service.
///
/// # Errors
///
/// Returns `BotError::Catalog` on a non-success status or an unparseable body, and
/// `BotError::Http` on transport failure.
pub async fn load_catalog(client: &Client, url: &str) -> Result<Vec<RawEntry>> {
    info!("Fetching catalog from {}", url);

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        error!("Catalog request failed with status {}", status);
        return Err(BotError::Catalog(format!("catalog source returned {}", status)));
    }

    let body = response.text().await?;
    debug!("Catalog response: {} bytes", body.len());

    let entries = parse_catalog(&body)?;
    info!("Loaded {} catalog entries from API", entries.len());
    Ok(entries)
}

/// Drops catalog entries whose names match any configured pattern.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    patterns: Vec<Regex>,
}

impl ExcludeFilter {
    /// Compiles the patterns.
    ///
    /// # Errors
    ///
    /// Returns `BotError::Config` for the first pattern that is not a valid regex.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    BotError::config(format!("invalid exclude pattern '{}': {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Returns the entries that survive the filter, in their original order.
    pub fn apply(&self, entries: Vec<RawEntry>) -> Vec<RawEntry> {
        let before = entries.len();
        let kept: Vec<RawEntry> = entries
            .into_iter()
            .filter(|e| !self.is_excluded(&e.name))
            .collect();
        if kept.len() != before {
            info!(
                "Excluded {} catalog entries matching {} patterns",
                before - kept.len(),
                self.patterns.len()
            );
        }
        kept
    }
}
