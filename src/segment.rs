//! Time-window segmentation.
//!
//! A retrieval window regularly exceeds what the backend can answer in one
//! call, so it is split into an ordered, contiguous, non-overlapping run of
//! segments bounded by a maximum span. The contiguity tick is one second:
//! each segment starts exactly one second after its predecessor ends.

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::model::TimeSegment;
use chrono::{Days, NaiveDateTime};
use tracing::{debug, info, warn};

/// Split `[start, end]` into segments of at most `max_span_days` days.
///
/// A non-positive `max_span_days` falls back to the configured default. The
/// walk stops early once `cfg.max_segments` segments exist, which bounds the
/// cost of pathological inputs; the final segment is clamped to `end`.
pub fn segment_range(
    start: NaiveDateTime,
    end: NaiveDateTime,
    max_span_days: i64,
    cfg: &FetchConfig,
) -> Result<Vec<TimeSegment>, FetchError> {
    if start > end {
        return Err(FetchError::InvalidRange { start, end });
    }

    let span = if max_span_days <= 0 {
        cfg.default_max_span_days
    } else {
        max_span_days
    };

    let mut segments = Vec::new();
    let mut current_start = start;
    let mut index = 0usize;

    while current_start <= end && segments.len() < cfg.max_segments {
        // Segment covers `span` whole days, ending at 23:59:59 of its last
        // day unless that runs past the requested end.
        let last_day = current_start.date() + Days::new(span.saturating_sub(1) as u64);
        let mut current_end = last_day.and_hms_opt(23, 59, 59).unwrap_or(end);
        if current_end > end {
            current_end = end;
        }

        let is_last = current_end == end;
        let segment = TimeSegment {
            index,
            id: segment_id(index, &current_start, &current_end),
            start: current_start,
            end: current_end,
            expected_count: expected_count(&current_start, &current_end, cfg),
            is_last,
        };
        debug!(segment = %segment.describe(), "created segment");
        segments.push(segment);

        if is_last {
            break;
        }
        current_start = current_end + chrono::Duration::seconds(1);
        index += 1;
    }

    if let Some(last) = segments.last() {
        if !last.is_last {
            warn!(
                max_segments = cfg.max_segments,
                "segment cap reached before covering the window; tail truncated"
            );
        }
    }

    info!(count = segments.len(), %start, %end, "segmented time range");
    Ok(segments)
}

/// Segmentation that adapts span size to expected event density.
///
/// When the whole window would produce more events than a single segment can
/// practically carry, the span shrinks so that no segment is expected to
/// overflow `cfg.max_events_per_segment`.
pub fn intelligent_segment_range(
    start: NaiveDateTime,
    end: NaiveDateTime,
    max_span_days: i64,
    cfg: &FetchConfig,
) -> Result<Vec<TimeSegment>, FetchError> {
    if start > end {
        return Err(FetchError::InvalidRange { start, end });
    }

    let total_days = (end.date() - start.date()).num_days() + 1;
    let expected_total = total_days * i64::from(cfg.expected_events_per_day);

    let mut adjusted = if max_span_days <= 0 {
        cfg.default_max_span_days
    } else {
        max_span_days
    };
    if expected_total > i64::from(cfg.max_events_per_segment) && cfg.expected_events_per_day > 0 {
        adjusted = (i64::from(cfg.max_events_per_segment)
            / i64::from(cfg.expected_events_per_day))
        .max(1);
    }

    debug!(
        total_days,
        expected_total, adjusted, "intelligent segmentation parameters"
    );
    segment_range(start, end, adjusted, cfg)
}

/// Whether a window is wide enough to need splitting at all.
pub fn needs_segmentation(start: NaiveDateTime, end: NaiveDateTime, max_span_days: i64) -> bool {
    if start > end {
        return false;
    }
    let days = (end.date() - start.date()).num_days() + 1;
    days > max_span_days
}

/// Precondition check before dispatch: every segment well-formed and, in
/// index order, exactly contiguous (no gap, no overlap).
pub fn validate_segments(segments: &[TimeSegment]) -> bool {
    if segments.is_empty() {
        return false;
    }

    for segment in segments {
        if !segment.is_valid() {
            warn!(segment = %segment.describe(), "malformed segment");
            return false;
        }
    }

    let mut sorted: Vec<&TimeSegment> = segments.iter().collect();
    sorted.sort_by_key(|s| s.index);

    for pair in sorted.windows(2) {
        let expected_start = pair[0].end + chrono::Duration::seconds(1);
        if pair[1].start != expected_start {
            warn!(
                current = %pair[0].describe(),
                next = %pair[1].describe(),
                "segments are not contiguous"
            );
            return false;
        }
    }

    true
}

fn segment_id(index: usize, start: &NaiveDateTime, end: &NaiveDateTime) -> String {
    format!(
        "segment_{}_{}_{}",
        index,
        start.date().format("%Y%m%d"),
        end.date().format("%Y%m%d")
    )
}

fn expected_count(start: &NaiveDateTime, end: &NaiveDateTime, cfg: &FetchConfig) -> u32 {
    let days = (end.date() - start.date()).num_days() + 1;
    let estimate = (days.max(0) as u32).saturating_mul(cfg.expected_events_per_day);
    // Always ask for at least a handful so sparse windows still return
    // something instead of a degenerate one-event response.
    estimate.max(cfg.min_events_per_segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn cfg() -> FetchConfig {
        FetchConfig::default()
    }

    #[test]
    fn test_ten_days_span_seven_yields_two_segments() {
        // Window 2025-01-01 .. 2025-01-10 with a 7-day span splits into
        // [01-01, 01-07] and [01-08, 01-10].
        let segments = segment_range(
            dt(2025, 1, 1, 0, 0, 0),
            dt(2025, 1, 10, 23, 59, 59),
            7,
            &cfg(),
        )
        .unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start, dt(2025, 1, 1, 0, 0, 0));
        assert_eq!(segments[0].end, dt(2025, 1, 7, 23, 59, 59));
        assert!(!segments[0].is_last);
        assert_eq!(segments[1].start, dt(2025, 1, 8, 0, 0, 0));
        assert_eq!(segments[1].end, dt(2025, 1, 10, 23, 59, 59));
        assert!(segments[1].is_last);
        assert_eq!(segments[0].expected_count, 70);
        assert_eq!(segments[1].expected_count, 30);
    }

    #[test]
    fn test_contiguity_for_arbitrary_windows() {
        let start = dt(2024, 11, 3, 6, 30, 0);
        let end = dt(2024, 12, 20, 18, 0, 0);
        let segments = segment_range(start, end, 9, &cfg()).unwrap();

        assert_eq!(segments[0].start, start);
        assert_eq!(segments.last().unwrap().end, end);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + chrono::Duration::seconds(1));
        }
        assert!(validate_segments(&segments));
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let start = dt(2025, 3, 1, 0, 0, 0);
        let end = dt(2025, 3, 29, 23, 59, 59);
        let a = segment_range(start, end, 5, &cfg()).unwrap();
        let b = segment_range(start, end, 5, &cfg()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let err = segment_range(dt(2025, 1, 2, 0, 0, 0), dt(2025, 1, 1, 0, 0, 0), 7, &cfg());
        assert!(matches!(err, Err(FetchError::InvalidRange { .. })));
    }

    #[test]
    fn test_non_positive_span_uses_default() {
        let segments = segment_range(
            dt(2025, 1, 1, 0, 0, 0),
            dt(2025, 1, 10, 23, 59, 59),
            0,
            &cfg(),
        )
        .unwrap();
        // Default span is 7 days, so the shape matches the explicit case.
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_segment_cap_bounds_pathological_windows() {
        let segments = segment_range(
            dt(2000, 1, 1, 0, 0, 0),
            dt(2030, 1, 1, 0, 0, 0),
            1,
            &cfg(),
        )
        .unwrap();
        assert_eq!(segments.len(), cfg().max_segments);
        assert!(!segments.last().unwrap().is_last);
    }

    #[test]
    fn test_intelligent_segmentation_shrinks_dense_spans() {
        // 30 days at 10 events/day far exceeds the 50-event segment cap, so
        // the span shrinks to 50 / 10 = 5 days.
        let segments = intelligent_segment_range(
            dt(2025, 1, 1, 0, 0, 0),
            dt(2025, 1, 30, 23, 59, 59),
            7,
            &cfg(),
        )
        .unwrap();
        assert_eq!(segments[0].span_days(), 5);
        assert!(segments
            .iter()
            .all(|s| s.expected_count <= cfg().max_events_per_segment));
    }

    #[test]
    fn test_validate_rejects_one_second_gap() {
        let mut segments = segment_range(
            dt(2025, 1, 1, 0, 0, 0),
            dt(2025, 1, 10, 23, 59, 59),
            7,
            &cfg(),
        )
        .unwrap();
        segments[1].start += chrono::Duration::seconds(1);
        assert!(!validate_segments(&segments));
    }

    #[test]
    fn test_validate_rejects_overlap_and_malformed() {
        let mut segments = segment_range(
            dt(2025, 1, 1, 0, 0, 0),
            dt(2025, 1, 10, 23, 59, 59),
            7,
            &cfg(),
        )
        .unwrap();
        segments[1].start -= chrono::Duration::seconds(1);
        assert!(!validate_segments(&segments));

        segments[1].start = segments[1].end + chrono::Duration::days(1);
        assert!(!validate_segments(&segments));

        assert!(!validate_segments(&[]));
    }

    #[test]
    fn test_needs_segmentation() {
        assert!(needs_segmentation(
            dt(2025, 1, 1, 0, 0, 0),
            dt(2025, 1, 10, 0, 0, 0),
            7
        ));
        assert!(!needs_segmentation(
            dt(2025, 1, 1, 0, 0, 0),
            dt(2025, 1, 7, 0, 0, 0),
            7
        ));
        assert!(!needs_segmentation(
            dt(2025, 1, 2, 0, 0, 0),
            dt(2025, 1, 1, 0, 0, 0),
            7
        ));
    }

    #[test]
    fn test_single_day_window_is_one_segment() {
        let segments = segment_range(
            dt(2025, 5, 5, 8, 0, 0),
            dt(2025, 5, 5, 20, 0, 0),
            7,
            &cfg(),
        )
        .unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_last);
        assert_eq!(segments[0].span_days(), 1);
    }
}
