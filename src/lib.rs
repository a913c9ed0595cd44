//! Segmented retrieval of structured event records from rate-limited LLM
//! backends.
//!
//! A fetch splits its time window into day-aligned segments, fans the
//! segments out over a bounded worker pool, and sends each one to whichever
//! of two backend endpoints (web-search capable, or the plain official one)
//! is currently healthy. Responses arrive as free-form text and are
//! interpreted through a ladder of JSON extraction strategies before the
//! per-segment results are merged, deduplicated, and sorted.
//!
//! The entry point is [`fetch::fetch_events`] with an [`client::ApiClient`]
//! built from a [`config::Config`].

pub mod accounting;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod health;
pub mod merge;
pub mod model;
pub mod parse;
pub mod prompt;
pub mod segment;
pub mod select;

pub use client::ApiClient;
pub use config::{Config, EndpointConfig, FetchConfig};
pub use error::FetchError;
pub use fetch::{fetch_events, FetchReport, FetchRequest};
pub use model::{EventRecord, TimeSegment};
pub use parse::ParseOutcome;
pub use select::SearchPolicy;
