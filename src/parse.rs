//! Response interpretation: turning messy backend payloads into typed
//! event records.
//!
//! Backends wrap JSON in prose, markdown fences, or truncate it mid-array,
//! so extraction tries progressively more forgiving strategies and stops at
//! the first one that yields structurally valid events. Heuristic text
//! extraction is deliberately the last resort and stays behind the same
//! interface; its guesswork never leaks into the JSON path.

use crate::model::{EventRecord, TimeSegment};
use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};
use uuid::Uuid;

const TITLE_LEN: std::ops::RangeInclusive<usize> = 5..=200;
const DESCRIPTION_LEN: std::ops::RangeInclusive<usize> = 10..=1000;
const EXCERPT_LEN: usize = 200;

/// Field names the prompt demands and the completeness check requires.
const REQUIRED_FIELDS: [&str; 4] = ["id", "title", "eventTime", "description"];

/// Test-data markers; a record whose title and description both contain one
/// is backend filler, not an event.
const SPAM_MARKERS: [&str; 2] = ["test", "example"];

/// Tagged interpretation result. Distinguishes "the backend reported zero
/// events" from "we could not make sense of the response" — the two demand
/// different downstream accounting.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// At least one record survived extraction and validation.
    Parsed(Vec<EventRecord>),
    /// Structurally valid response containing no (valid) events.
    Empty,
    /// No strategy produced anything usable.
    ParseFailed { excerpt: String },
}

/// Parse a raw payload into validated event records for one segment.
pub fn interpret_response(raw: &str, segment: &TimeSegment) -> ParseOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParseOutcome::ParseFailed {
            excerpt: String::new(),
        };
    }

    let mut structure_seen = false;
    for (method, candidate) in json_candidates(trimmed) {
        let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        let Some(nodes) = event_nodes(&value) else {
            continue;
        };
        structure_seen = true;

        let records: Vec<EventRecord> = nodes
            .iter()
            .map(|node| parse_event_node(node, segment, method))
            .filter(|record| validate_record(record, segment))
            .collect();

        if !records.is_empty() {
            debug!(method, count = records.len(), segment = %segment.id, "parsed events");
            return ParseOutcome::Parsed(records);
        }
    }

    if structure_seen {
        // Valid JSON with zero (valid) events is an answer, not a failure;
        // do not let the text heuristic second-guess it.
        return ParseOutcome::Empty;
    }

    let heuristic: Vec<EventRecord> = extract_events_from_text(trimmed, segment)
        .into_iter()
        .filter(|record| validate_record(record, segment))
        .collect();
    if !heuristic.is_empty() {
        warn!(count = heuristic.len(), segment = %segment.id, "fell back to text extraction");
        return ParseOutcome::Parsed(heuristic);
    }

    ParseOutcome::ParseFailed {
        excerpt: trimmed.chars().take(EXCERPT_LEN).collect(),
    }
}

/// Heuristic completeness judgement for a raw payload.
///
/// A response is incomplete when it lacks bracket structure, misses required
/// field names, carries materially fewer event markers than expected, or
/// shows truncation markers. Incompleteness makes an otherwise-successful
/// call retryable.
pub fn is_response_complete(raw: &str, expected_count: u32) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }

    if !raw.contains('[') || !raw.contains(']') {
        debug!("response lacks JSON array structure");
        return false;
    }

    for field in REQUIRED_FIELDS {
        if !raw.contains(&format!("\"{field}\"")) {
            debug!(field, "response missing required field");
            return false;
        }
    }

    // "id" markers approximate the event count.
    let markers = raw.matches("\"id\"").count();
    let needed = (f64::from(expected_count) * 0.5).max(3.0) as usize;
    if markers < needed {
        debug!(markers, needed, "response carries too few events");
        return false;
    }

    if trimmed.ends_with("...")
        || trimmed.ends_with('…')
        || raw.contains("truncated")
        || raw.contains("省略")
        || raw.contains("继续")
    {
        debug!("response shows truncation markers");
        return false;
    }

    true
}

/// Clearly-flagged placeholder records for a segment whose response could
/// not be interpreted, so downstream accounting can tell "nothing happened"
/// from "we don't know what happened". Explicit caller choice, never
/// injected silently.
pub fn fallback_events(segment: &TimeSegment) -> Vec<EventRecord> {
    let count = segment.expected_count.min(3).max(1) as usize;
    (0..count)
        .map(|i| EventRecord {
            id: format!("{}_fallback_{}", segment.id, i),
            title: format!("Unresolved event {} in window", i + 1),
            description: format!(
                "Placeholder for segment {}: the backend response could not be interpreted.",
                segment.id
            ),
            event_time: segment.start + chrono::Duration::hours(2 * i as i64),
            location: String::new(),
            subject: String::new(),
            object: String::new(),
            event_type: "placeholder".into(),
            keywords: vec![],
            sources: vec![],
            credibility_score: 0.3,
            fetch_method: "fallback".into(),
            flagged: true,
        })
        .collect()
}

/// Extraction candidates in strategy order, each labeled with the fetch
/// method stamped onto records it produces.
fn json_candidates(trimmed: &str) -> Vec<(&'static str, String)> {
    let mut candidates = Vec::new();

    // 1. The whole payload is already JSON.
    candidates.push(("json", trimmed.to_string()));

    // 2. A fenced block tagged as JSON, then 3. any fenced block.
    if let Some(block) = fenced_block(trimmed, true) {
        candidates.push(("json_fenced", block));
    }
    if let Some(block) = fenced_block(trimmed, false) {
        candidates.push(("json_fenced", block));
    }

    // 4. Every balanced object span, 5. every balanced array span wrapped
    // so it carries the expected shape. Emitting all spans lets a payload
    // whose first object is unrelated prose metadata still surface the
    // event-bearing object further in.
    for span in balanced_spans(trimmed, '{', '}') {
        candidates.push(("json_extracted", span.to_string()));
    }
    for span in balanced_spans(trimmed, '[', ']') {
        candidates.push(("json_extracted", format!("{{\"events\": {span}}}")));
    }

    candidates
}

/// The content of the first markdown code fence; `json_only` restricts to
/// blocks tagged ```json.
fn fenced_block(text: &str, json_only: bool) -> Option<String> {
    let open = if json_only { "```json" } else { "```" };
    let start = text.find(open)? + open.len();
    let rest = &text[start..];
    // Skip the remainder of the fence header line for untagged blocks.
    let rest = match rest.find('\n') {
        Some(idx) if !json_only => &rest[idx + 1..],
        _ => rest,
    };
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

/// All top-level balanced `open..close` spans in order, string- and
/// escape-aware.
fn balanced_spans(text: &str, open: char, close: char) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }

        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx.take() {
                    spans.push(&text[start..=i]);
                }
            }
        }
    }

    spans
}

/// The event nodes carried by a parsed JSON value, if it has the expected
/// shape: `{"events": [...]}`, a bare array, or a single event object.
fn event_nodes(value: &Value) -> Option<Vec<Value>> {
    if let Some(array) = value.as_array() {
        return Some(array.clone());
    }
    if let Some(object) = value.as_object() {
        if let Some(Value::Array(array)) = object.get("events") {
            return Some(array.clone());
        }
        if object.contains_key("title") {
            return Some(vec![value.clone()]);
        }
    }
    None
}

fn parse_event_node(node: &Value, segment: &TimeSegment, method: &str) -> EventRecord {
    let (event_time, flagged) = match node.get("eventTime").and_then(Value::as_str) {
        Some(raw) => match parse_event_time(raw) {
            Some(time) => (time, false),
            None => {
                debug!(raw, segment = %segment.id, "unparsable event time; defaulting");
                (segment.start, true)
            }
        },
        None => (segment.start, true),
    };

    EventRecord {
        id: str_field(node, "id").unwrap_or_else(|| Uuid::new_v4().to_string()),
        title: str_field(node, "title").unwrap_or_default(),
        description: str_field(node, "description").unwrap_or_default(),
        event_time,
        location: str_field(node, "location").unwrap_or_default(),
        subject: str_field(node, "subject").unwrap_or_default(),
        object: str_field(node, "object").unwrap_or_default(),
        event_type: str_field(node, "eventType").unwrap_or_else(|| "general".into()),
        keywords: string_list(node, "keywords"),
        sources: string_list(node, "sources"),
        credibility_score: node
            .get("credibilityScore")
            .and_then(Value::as_f64)
            .unwrap_or(0.8),
        fetch_method: method.to_string(),
        flagged,
    }
}

fn str_field(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn string_list(node: &Value, key: &str) -> Vec<String> {
    node.get(key)
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_event_time(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = raw.trim().trim_end_matches('Z');
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Some(time);
        }
    }
    chrono::NaiveDate::parse_from_str(cleaned, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Per-record acceptance check. Records failing it are dropped, not retried.
fn validate_record(record: &EventRecord, segment: &TimeSegment) -> bool {
    if record.id.trim().is_empty()
        || record.title.trim().is_empty()
        || record.description.trim().is_empty()
    {
        return false;
    }
    if !TITLE_LEN.contains(&record.title.chars().count()) {
        return false;
    }
    if !DESCRIPTION_LEN.contains(&record.description.chars().count()) {
        return false;
    }
    if record.event_time < segment.start || record.event_time > segment.end {
        return false;
    }
    if !(0.0..=1.0).contains(&record.credibility_score) {
        return false;
    }

    let title = record.title.to_lowercase();
    let description = record.description.to_lowercase();
    for marker in SPAM_MARKERS {
        if title.contains(marker) && description.contains(marker) {
            return false;
        }
    }

    true
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid regex"))
}

fn numbered_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.)]\s*").expect("valid regex"))
}

/// Last-resort line-oriented extraction from prose, keyed on numbered lines
/// and date-like substrings. Produces lower-confidence, flagged records.
fn extract_events_from_text(raw: &str, segment: &TimeSegment) -> Vec<EventRecord> {
    let mut events: Vec<EventRecord> = Vec::new();
    let mut current: Option<EventRecord> = None;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let lowered = line.to_lowercase();
        let starts_event = numbered_line_regex().is_match(line)
            || ((lowered.contains("event") || lowered.contains("news"))
                && date_regex().is_match(line));

        if starts_event {
            if let Some(event) = current.take() {
                events.push(event);
            }

            let title = numbered_line_regex().replace(line, "").trim().to_string();
            let event_time = date_regex()
                .find(line)
                .and_then(|m| parse_event_time(m.as_str()));

            current = Some(EventRecord {
                id: Uuid::new_v4().to_string(),
                title,
                description: String::new(),
                event_time: event_time.unwrap_or(segment.start),
                location: String::new(),
                subject: String::new(),
                object: String::new(),
                event_type: "general".into(),
                keywords: vec![],
                sources: vec![],
                credibility_score: 0.6,
                fetch_method: "text_heuristic".into(),
                flagged: true,
            });
        } else if let Some(event) = current.as_mut() {
            if !event.description.is_empty() {
                event.description.push('\n');
            }
            event.description.push_str(line);
        }
    }

    if let Some(event) = current.take() {
        events.push(event);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn segment() -> TimeSegment {
        TimeSegment {
            index: 0,
            id: "segment_0_20250101_20250107".into(),
            start: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 1, 7)
                .unwrap()
                .and_hms_opt(23, 59, 59)
                .unwrap(),
            expected_count: 70,
            is_last: true,
        }
    }

    fn event_json(id: &str, time: &str) -> String {
        format!(
            r#"{{"id": "{id}", "title": "Border talks resume", "description": "Delegations met to resume negotiations.", "eventTime": "{time}", "location": "Geneva", "subject": "delegation", "object": "council", "eventType": "diplomacy", "keywords": ["talks"], "sources": ["wire"], "credibilityScore": 0.9}}"#
        )
    }

    #[test]
    fn test_whole_payload_json() {
        let raw = format!(r#"{{"events": [{}]}}"#, event_json("e1", "2025-01-03T10:00:00"));
        let ParseOutcome::Parsed(events) = interpret_response(&raw, &segment()) else {
            panic!("expected parsed outcome");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e1");
        assert_eq!(events[0].fetch_method, "json");
        assert!(!events[0].flagged);
    }

    #[test]
    fn test_fenced_json_with_prose_wrapper() {
        let raw = format!(
            "Sure! Here are the events:\n```json\n{{\"events\": [{}]}}\n```\nLet me know.",
            event_json("e2", "2025-01-02 08:30:00")
        );
        let ParseOutcome::Parsed(events) = interpret_response(&raw, &segment()) else {
            panic!("expected parsed outcome");
        };
        assert_eq!(events[0].id, "e2");
        assert_eq!(events[0].fetch_method, "json_fenced");
    }

    #[test]
    fn test_fenced_empty_events_is_empty_not_failure() {
        // Scenario: "Sure! ```json\n{"events":[]}\n```" must land on Empty.
        let raw = "Sure! ```json\n{\"events\":[]}\n```";
        assert_eq!(interpret_response(raw, &segment()), ParseOutcome::Empty);
    }

    #[test]
    fn test_bare_array_and_embedded_object_spans() {
        let raw = format!(
            "The data follows [{}] as requested.",
            event_json("e3", "2025-01-04T12:00:00")
        );
        let ParseOutcome::Parsed(events) = interpret_response(&raw, &segment()) else {
            panic!("expected parsed outcome");
        };
        assert_eq!(events[0].id, "e3");
    }

    #[test]
    fn test_event_object_after_unrelated_object_is_recovered() {
        // A leading non-event object must not shadow the event-bearing one.
        let raw = format!(
            "{{\"note\": \"analysis context\"}} and then the data: {{\"events\": [{}]}}",
            event_json("e5", "2025-01-05T09:00:00")
        );
        let ParseOutcome::Parsed(events) = interpret_response(&raw, &segment()) else {
            panic!("expected parsed outcome");
        };
        assert_eq!(events[0].id, "e5");
        assert_eq!(events[0].fetch_method, "json_extracted");
    }

    #[test]
    fn test_missing_event_time_defaults_to_segment_start_and_flags() {
        let raw = r#"{"events": [{"id": "e4", "title": "Border talks resume", "description": "Delegations met to resume negotiations."}]}"#;
        let ParseOutcome::Parsed(events) = interpret_response(raw, &segment()) else {
            panic!("expected parsed outcome");
        };
        assert_eq!(events[0].event_time, segment().start);
        assert!(events[0].flagged);
        assert_eq!(events[0].event_type, "general");
        assert_eq!(events[0].credibility_score, 0.8);
    }

    #[test]
    fn test_out_of_window_records_are_dropped() {
        let raw = format!(
            r#"{{"events": [{}, {}]}}"#,
            event_json("in", "2025-01-05T00:00:00"),
            event_json("out", "2025-02-05T00:00:00")
        );
        let ParseOutcome::Parsed(events) = interpret_response(&raw, &segment()) else {
            panic!("expected parsed outcome");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "in");
    }

    #[test]
    fn test_validation_drops_short_and_out_of_range_records() {
        let seg = segment();
        let mut record = parse_event_node(
            &serde_json::from_str::<Value>(&event_json("e", "2025-01-03T00:00:00")).unwrap(),
            &seg,
            "json",
        );
        assert!(validate_record(&record, &seg));

        record.title = "Hi".into();
        assert!(!validate_record(&record, &seg));
        record.title = "Border talks resume".into();

        record.credibility_score = 1.4;
        assert!(!validate_record(&record, &seg));
        record.credibility_score = 0.9;

        record.description = "short".into();
        assert!(!validate_record(&record, &seg));
    }

    #[test]
    fn test_unparseable_prose_is_parse_failed() {
        let raw = "The weather was lovely and nothing notable happened.";
        let ParseOutcome::ParseFailed { excerpt } = interpret_response(raw, &segment()) else {
            panic!("expected parse failure");
        };
        assert!(excerpt.starts_with("The weather"));
    }

    #[test]
    fn test_text_heuristic_recovers_numbered_lines() {
        let raw = "Summary of the week:\n\
                   1. Parliament passed the budget on 2025-01-03\n\
                   The vote concluded after a long debate over spending priorities.\n\
                   2. Port workers strike began 2025-01-05\n\
                   Dock operations halted across the region for several days.";
        let ParseOutcome::Parsed(events) = interpret_response(raw, &segment()) else {
            panic!("expected parsed outcome");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].fetch_method, "text_heuristic");
        assert!(events[0].flagged);
        assert_eq!(
            events[0].event_time,
            NaiveDate::from_ymd_opt(2025, 1, 3)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_completeness_requires_fields_markers_and_no_truncation() {
        let seg = segment();
        let full = format!(
            r#"{{"events": [{}, {}, {}]}}"#,
            event_json("a", "2025-01-02T00:00:00"),
            event_json("b", "2025-01-03T00:00:00"),
            event_json("c", "2025-01-04T00:00:00")
        );
        assert!(is_response_complete(&full, 5));

        // Too few markers against a large expectation.
        assert!(!is_response_complete(&full, seg.expected_count));
        // Truncation marker.
        assert!(!is_response_complete(&format!("{full}..."), 5));
        // Missing structure entirely.
        assert!(!is_response_complete("no json here", 5));
        // Missing a required field name.
        let missing = full.replace("\"eventTime\"", "\"when\"");
        assert!(!is_response_complete(&missing, 5));
    }

    #[test]
    fn test_completeness_floor_is_three_markers() {
        // Even for tiny expectations, fewer than 3 events is incomplete.
        let two = format!(
            r#"{{"events": [{}, {}]}}"#,
            event_json("a", "2025-01-02T00:00:00"),
            event_json("b", "2025-01-03T00:00:00")
        );
        assert!(!is_response_complete(&two, 1));
    }

    #[test]
    fn test_fallback_events_are_flagged_placeholders() {
        let seg = segment();
        let events = fallback_events(&seg);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.flagged));
        assert!(events.iter().all(|e| e.fetch_method == "fallback"));
        assert!(events.iter().all(|e| e.credibility_score == 0.3));
        assert_eq!(events[0].event_time, seg.start);
        assert_eq!(events[1].event_time, seg.start + chrono::Duration::hours(2));
    }
}
