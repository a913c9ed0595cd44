//! Top-level orchestration: segment a window, dispatch the batch, and
//! collate the per-segment outcomes into one merged, deduplicated report.

use crate::client::ApiClient;
use crate::dispatch::dispatch_batch;
use crate::error::FetchError;
use crate::merge::merge_events;
use crate::model::{EventRecord, TimeSegment};
use crate::parse::{fallback_events, ParseOutcome};
use crate::prompt::build_base_prompt;
use crate::segment::{intelligent_segment_range, validate_segments};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{info, warn};

/// One retrieval request over a closed time window.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Short name of the timeline or topic being populated.
    pub name: String,
    pub description: String,
    /// Geographic scope; empty means global.
    pub regions: Vec<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Result of one fetch: the merged events plus enough provenance for the
/// caller to see which parts of the window are unreliable.
#[derive(Debug)]
pub struct FetchReport {
    /// Deduplicated events in chronological order.
    pub events: Vec<EventRecord>,
    /// The segments the window was split into, in order.
    pub segments: Vec<TimeSegment>,
    /// Segments that produced no response at all.
    pub failed_segments: Vec<String>,
    /// Segments whose payload could not be parsed; their events in
    /// `events` are flagged placeholders.
    pub parse_failures: Vec<String>,
}

impl FetchReport {
    /// True when every segment produced a real, parsed payload.
    pub fn is_complete(&self) -> bool {
        self.failed_segments.is_empty() && self.parse_failures.is_empty()
    }
}

/// Fetch all events in the request's window. Fails only on invalid input;
/// backend trouble degrades the report instead of erroring.
pub async fn fetch_events(
    client: Arc<ApiClient>,
    request: &FetchRequest,
) -> Result<FetchReport, FetchError> {
    let fetch = client.fetch_config();
    let segments = intelligent_segment_range(
        request.start,
        request.end,
        fetch.default_max_span_days,
        fetch,
    )?;
    if !validate_segments(&segments) {
        return Err(FetchError::InvalidSegments {
            reason: format!(
                "segmentation of [{} .. {}] produced a non-contiguous cover",
                request.start, request.end
            ),
        });
    }

    info!(
        name = %request.name,
        start = %request.start,
        end = %request.end,
        segments = segments.len(),
        "starting event fetch"
    );

    let base_prompt = build_base_prompt(request);
    let outcomes = dispatch_batch(Arc::clone(&client), &base_prompt, segments.clone()).await;
    let report = collate(segments, outcomes);

    info!(
        events = report.events.len(),
        failed_segments = report.failed_segments.len(),
        parse_failures = report.parse_failures.len(),
        "event fetch finished"
    );
    Ok(report)
}

/// Fold per-segment outcomes into the final report. A missing outcome is a
/// failed segment contributing zero events; an unparseable payload
/// contributes flagged placeholders so the gap stays visible downstream.
pub(crate) fn collate(
    segments: Vec<TimeSegment>,
    outcomes: Vec<Option<ParseOutcome>>,
) -> FetchReport {
    let mut lists: Vec<Vec<EventRecord>> = Vec::with_capacity(segments.len());
    let mut failed_segments = Vec::new();
    let mut parse_failures = Vec::new();

    for (segment, outcome) in segments.iter().zip(outcomes) {
        match outcome {
            None => {
                warn!(segment = %segment.id, "segment failed, contributing no events");
                failed_segments.push(segment.id.clone());
            }
            Some(ParseOutcome::Parsed(events)) => lists.push(events),
            Some(ParseOutcome::Empty) => {}
            Some(ParseOutcome::ParseFailed { excerpt }) => {
                warn!(
                    segment = %segment.id,
                    excerpt = %excerpt,
                    "unparseable payload, substituting flagged placeholders"
                );
                parse_failures.push(segment.id.clone());
                lists.push(fallback_events(segment));
            }
        }
    }

    FetchReport {
        events: merge_events(lists),
        segments,
        failed_segments,
        parse_failures,
    }
}
