//! Phrase matching against catalog entry names.
//!
//! Each catalog entry name is turned into an ordered list of lowercase words
//! (`bufo-hop-in-we-re-going.gif` becomes `hop in we re going`). A post matches an
//! entry when that word sequence appears contiguously in the post's words.
//! When several entries match, the one earliest in catalog order wins.

use log::info;
use std::collections::HashMap;

use crate::catalog::RawEntry;

/// Leading word dropped from every entry name.
const NAME_PREFIX: &str = "bufo";

/// File suffixes removed before the name is split into words.
const MEDIA_SUFFIXES: &[&str] = &[
    ".gif", ".png", ".jpg", ".jpeg", ".webp", ".mp4", ".mov", ".webm",
];

/// A catalog entry with its derived matching phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Source filename, unique within the catalog
    pub name: String,
    /// Media location
    pub url: String,
    /// Lowercase words derived from `name`
    pub phrase: Vec<String>,
}

impl CatalogEntry {
    /// Derives the phrase from `raw.name`.
    pub fn from_raw(raw: RawEntry) -> Self {
        let phrase = derive_phrase(&raw.name);
        Self {
            name: raw.name,
            url: raw.url,
            phrase,
        }
    }

    /// The phrase joined with single spaces, for logging.
    pub fn phrase_text(&self) -> String {
        self.phrase.join(" ")
    }
}

/// Lowercases text and splits it into maximal runs of ASCII letters `a` to `z`.
///
/// Everything else separates words, including accented and non-Latin letters,
/// so `café` yields `caf`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_lowercase())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Derives the matching phrase from an entry name.
///
/// Strips a known media suffix and a leading `bufo` word, then splits on anything
/// that is not a letter.
pub fn derive_phrase(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let stem = MEDIA_SUFFIXES
        .iter()
        .find_map(|suffix| lower.strip_suffix(suffix))
        .unwrap_or(&lower);

    let mut words = tokenize(stem);
    if words.first().map(String::as_str) == Some(NAME_PREFIX) {
        words.remove(0);
    }
    words
}

/// In-memory phrase index. Immutable once built.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    entries: Vec<CatalogEntry>,
    // first phrase word -> catalog positions, ascending
    by_first_word: HashMap<String, Vec<usize>>,
    min_words: usize,
}

impl PhraseMatcher {
    /// Builds the index, discarding entries whose phrase is shorter than `min_words`.
    ///
    /// Catalog order is preserved for the retained entries.
    pub fn build<I>(entries: I, min_words: usize) -> Self
    where
        I: IntoIterator<Item = RawEntry>,
    {
        let entries: Vec<CatalogEntry> = entries
            .into_iter()
            .map(CatalogEntry::from_raw)
            .filter(|e| e.phrase.len() >= min_words)
            .collect();

        let mut by_first_word: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(first) = entry.phrase.first() {
                by_first_word.entry(first.clone()).or_default().push(idx);
            }
        }

        info!(
            "Indexed {} catalog entries with >= {} word phrases",
            entries.len(),
            min_words
        );

        Self {
            entries,
            by_first_word,
            min_words,
        }
    }

    /// Returns the first entry, in catalog order, whose phrase occurs contiguously in `text`.
    pub fn find_match(&self, text: &str) -> Option<&CatalogEntry> {
        let words = tokenize(text);
        if words.len() < self.min_words {
            return None;
        }

        let mut best: Option<usize> = None;
        for (pos, word) in words.iter().enumerate() {
            let Some(candidates) = self.by_first_word.get(word) else {
                continue;
            };
            for &idx in candidates {
                if best.is_some_and(|b| idx >= b) {
                    break;
                }
                if words[pos..].starts_with(&self.entries[idx].phrase) {
                    best = Some(idx);
                    break;
                }
            }
            if best == Some(0) {
                break;
            }
        }

        best.map(|idx| &self.entries[idx])
    }

    /// Number of indexed entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn min_words(&self) -> usize {
        self.min_words
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}
