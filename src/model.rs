//! Core data types shared across the engine.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bounded sub-range of a retrieval window, processed independently.
///
/// Segments produced for a window are contiguous and non-overlapping:
/// `segments[i].end + 1s == segments[i + 1].start`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSegment {
    pub index: usize,
    pub id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Density estimate for the span, not a hard limit.
    pub expected_count: u32,
    pub is_last: bool,
}

impl TimeSegment {
    /// Inclusive day count covered by this segment.
    pub fn span_days(&self) -> i64 {
        (self.end.date() - self.start.date()).num_days() + 1
    }

    /// A segment is well-formed when its bounds are ordered.
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn describe(&self) -> String {
        format!(
            "{} [{} .. {}] expected={}",
            self.id, self.start, self.end, self.expected_count
        )
    }
}

/// Usage statistics as reported by the backend, when present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Outcome of a single network attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "SUCCESS",
            AttemptOutcome::Failed => "FAILED",
        }
    }
}

/// Instrumentation record for one attempt inside a retry loop.
///
/// Ephemeral: it exists to drive backoff decisions and to be handed to the
/// call-accounting sink, never persisted by this crate.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub request_id: String,
    pub segment_id: Option<String>,
    /// Which endpoint family served the attempt ("web_search" / "official").
    pub api_type: &'static str,
    pub attempt: u32,
    pub started_at: NaiveDateTime,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
    pub token_usage: u32,
    pub error: Option<String>,
}

/// A typed event record interpreted from one backend response entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub event_time: NaiveDateTime,
    pub location: String,
    pub subject: String,
    pub object: String,
    pub event_type: String,
    pub keywords: Vec<String>,
    pub sources: Vec<String>,
    pub credibility_score: f64,
    /// How this record was obtained (json parse, text heuristic, fallback).
    pub fetch_method: String,
    /// Set when a quality check defaulted a field (e.g. missing event time);
    /// downstream consumers should scrutinize flagged records.
    pub flagged: bool,
}

impl EventRecord {
    /// Composite content fingerprint. Two records with equal keys describe
    /// the same event; the time component is the calendar date, so retries
    /// of the same event reported hours apart still collapse.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            subject: normalize(&self.subject),
            object: normalize(&self.object),
            event_type: normalize(&self.event_type),
            event_date: self.event_time.date().to_string(),
            location: normalize(&self.location),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    subject: String,
    object: String,
    event_type: String,
    event_date: String,
    location: String,
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Timezone-naive "now", matching the second-granularity timestamps used
/// throughout segmentation.
pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
