//! Cross-segment merge and deduplication.

use crate::model::EventRecord;
use std::collections::HashSet;
use tracing::info;

/// Flatten per-segment result lists into one time-ordered, duplicate-free
/// event sequence.
///
/// Input order is segment-index order, and the first occurrence of each
/// dedup key wins, so the record retained for a duplicated event is the one
/// from the earliest segment that reported it. Deterministic and idempotent:
/// merging an already-merged list is a no-op.
pub fn merge_events(lists: Vec<Vec<EventRecord>>) -> Vec<EventRecord> {
    let raw_total: usize = lists.iter().map(Vec::len).sum();

    let mut seen = HashSet::new();
    let mut merged: Vec<EventRecord> = lists
        .into_iter()
        .flatten()
        .filter(|event| seen.insert(event.dedup_key()))
        .collect();

    // Stable sort keeps first-seen order among records sharing a timestamp.
    merged.sort_by_key(|event| event.event_time);

    info!(raw = raw_total, merged = merged.len(), "merged segment results");
    merged
}
