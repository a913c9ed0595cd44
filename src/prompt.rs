//! Prompt construction for segment-scoped event retrieval.
//!
//! The backend only returns machine-usable payloads when the prompt pins
//! down the window, the expected volume, and the exact JSON shape, so both
//! builders spell those out explicitly.

use crate::fetch::FetchRequest;
use crate::model::TimeSegment;
use std::fmt::Write;

/// The field list every returned event must carry, mirrored by the parser.
const OUTPUT_FORMAT: &str = "\
Return a JSON object of the form {\"events\": [...]}. Each event must contain:
- id: unique event identifier
- title: concise event title
- description: detailed event description
- eventTime: time of occurrence (ISO format)
- location: where the event took place
- subject: acting party (person, organization)
- object: affected party
- eventType: category (political, economic, social, technology, ...)
- keywords: list of keywords
- sources: list of information sources
- credibilityScore: credibility in [0.0, 1.0]";

/// Base retrieval prompt for one request, before segment scoping.
pub fn build_base_prompt(request: &FetchRequest) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "=== Event retrieval task ===");
    let _ = writeln!(prompt, "Timeline: {}", request.name);
    if !request.description.is_empty() {
        let _ = writeln!(prompt, "Description: {}", request.description);
    }

    let regions = if request.regions.is_empty() {
        "global".to_string()
    } else {
        request.regions.join(", ")
    };
    let _ = writeln!(prompt, "Target regions: {regions}");
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Search for significant real-world events matching the timeline topic \
         within the requested time range and regions."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "=== Output format ===");
    let _ = writeln!(prompt, "{OUTPUT_FORMAT}");

    prompt
}

/// Scope a base prompt to one segment: window, expected count, span, and the
/// hard requirements that keep responses parseable and on-window.
pub fn build_segment_prompt(base: &str, segment: &TimeSegment) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "[Segmented retrieval request]");
    let _ = writeln!(prompt, "Segment id: {}", segment.id);
    let _ = writeln!(prompt, "Time range: {} to {}", segment.start, segment.end);
    let _ = writeln!(prompt, "Expected event count: {}", segment.expected_count);
    let _ = writeln!(prompt, "Span: {} days", segment.span_days());
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "{base}");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Strict requirements:");
    let _ = writeln!(
        prompt,
        "1. Only return events that occurred between {} and {}",
        segment.start, segment.end
    );
    let _ = writeln!(prompt, "2. Return complete, valid JSON; never truncate");
    let _ = writeln!(
        prompt,
        "3. Aim for roughly {} events for this segment",
        segment.expected_count
    );

    prompt
}
