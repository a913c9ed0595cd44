//! Error taxonomy for the retrieval engine.
//!
//! Only caller errors surface as `Err`: a bad window or a malformed segment
//! list means the request could never succeed. Environmental failures
//! (network, auth, truncation, timeout) degrade to `None`/`Empty`/partial
//! results inside the invoker, dispatcher, and interpreter instead of
//! propagating.

use chrono::NaiveDateTime;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The requested window is inverted. Fatal to the request.
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    /// A segment list handed to the dispatcher failed validation
    /// (gap, overlap, or malformed segment).
    #[error("segment list failed validation: {reason}")]
    InvalidSegments { reason: String },
}
