//! TTL-cached endpoint health verdicts.
//!
//! Probing on every request would double traffic against a rate-limited
//! backend, so verdicts are cached for a bounded duration and reused.
//! The cache is an owned service injected into the client rather than
//! process-global state, which keeps it resettable and testable. Verdicts
//! are advisory: last-writer-wins is fine because a stale entry self-corrects
//! at the next TTL expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
}

/// Concurrent map from endpoint identity to a time-bounded health verdict.
#[derive(Debug)]
pub struct HealthMonitor {
    ttl: Duration,
    cache: Mutex<HashMap<&'static str, HealthEntry>>,
}

impl HealthMonitor {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The cached verdict for `key`, if one exists and is younger than the
    /// TTL. `None` means the caller must probe and record a fresh verdict.
    pub fn cached_verdict(&self, key: &'static str) -> Option<bool> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).and_then(|entry| {
            if entry.checked_at.elapsed() < self.ttl {
                Some(entry.healthy)
            } else {
                None
            }
        })
    }

    /// Record a fresh probe result.
    pub fn record(&self, key: &'static str, healthy: bool) {
        debug!(key, healthy, "health verdict recorded");
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            key,
            HealthEntry {
                healthy,
                checked_at: Instant::now(),
            },
        );
    }

    /// Drop all cached verdicts. Operational recovery only; the steady-state
    /// path relies on TTL expiry.
    pub fn reset(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
        info!("health cache cleared");
    }
}
