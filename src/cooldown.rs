//! Per-entry posting cooldown.
//!
//! The store maps entry names to the time they were last posted. All reads and
//! writes go through one lock, and a posting attempt keeps that lock for its whole
//! duration via [`CooldownGuard`], so attempts never interleave.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

/// Last-post timestamps keyed by entry name.
#[derive(Debug)]
pub struct CooldownStore {
    window: Duration,
    records: Mutex<HashMap<String, DateTime<Utc>>>,
}

/// Exclusive permission to post one entry.
///
/// Holds the store lock until it is consumed by [`record_success`](Self::record_success)
/// or dropped. Dropping it leaves the entry's record untouched.
#[derive(Debug)]
pub struct CooldownGuard<'a> {
    name: String,
    records: MutexGuard<'a, HashMap<String, DateTime<Utc>>>,
}

impl CooldownStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Acquires the lock and checks the cooldown for `name`.
    ///
    /// Returns `None`, with the lock released, when the entry was posted less than
    /// one window before `now`.
    pub async fn begin(&self, name: &str, now: DateTime<Utc>) -> Option<CooldownGuard<'_>> {
        let records = self.records.lock().await;
        if let Some(last) = records.get(name) {
            let elapsed = now - *last;
            if elapsed < self.window {
                debug!(
                    "Cooldown active for {}: {}s remaining",
                    name,
                    (self.window - elapsed).num_seconds()
                );
                return None;
            }
        }
        Some(CooldownGuard {
            name: name.to_string(),
            records,
        })
    }

    pub async fn last_posted(&self, name: &str) -> Option<DateTime<Utc>> {
        self.records.lock().await.get(name).copied()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Removes records older than `max_age`. Returns how many were removed.
    pub async fn sweep(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, last| now - *last < max_age);
        let removed = before - records.len();
        if removed > 0 {
            debug!("Swept {} expired cooldown records", removed);
        }
        removed
    }
}

impl CooldownGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marks the entry as posted at `now` and releases the lock.
    pub fn record_success(mut self, now: DateTime<Utc>) {
        let name = std::mem::take(&mut self.name);
        self.records.insert(name, now);
    }
}
