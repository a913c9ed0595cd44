//! Configuration surface for the retrieval engine.
//!
//! Every tunable the algorithms consume is externally supplied here; the
//! defaults below are documented fallbacks, not policy baked into the
//! algorithms. Loadable from a TOML file, or constructed directly in tests.

use crate::select::SearchPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Credentials that ship in sample configs and must never reach the network.
const PLACEHOLDER_KEYS: [&str; 2] = ["sk-your-api-key-here", "sk-test-key-placeholder"];

/// One backend endpoint: URL, credential, model id, and whether generation
/// is augmented with live web search. Two long-lived instances exist per
/// process; both are read-only after startup and shared by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub supports_web_search: bool,
}

impl EndpointConfig {
    /// Stable name for health-cache keys and accounting records.
    pub fn api_type(&self) -> &'static str {
        if self.supports_web_search {
            "web_search"
        } else {
            "official"
        }
    }

    /// A missing or placeholder credential can never authenticate, so the
    /// health monitor treats it as unhealthy without a network call.
    pub fn has_usable_key(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && !PLACEHOLDER_KEYS.contains(&key)
    }
}

/// The two candidate endpoint configurations, looked up by capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    pub web_search: EndpointConfig,
    pub official: EndpointConfig,
}

impl Endpoints {
    /// Pure lookup by desired capability.
    pub fn for_capability(&self, web_search: bool) -> &EndpointConfig {
        if web_search {
            &self.web_search
        } else {
            &self.official
        }
    }

    /// The endpoint to try when `config` has failed.
    pub fn alternate(&self, config: &EndpointConfig) -> &EndpointConfig {
        self.for_capability(!config.supports_web_search)
    }
}

/// Tunables for segmentation, retry, health caching, and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// First retry sleep; doubles each retry.
    pub base_retry_delay_ms: u64,
    /// Cap on the exponential backoff.
    pub max_retry_delay_ms: u64,
    /// Retries after the initial attempt in the standard call path.
    pub max_retries: u32,
    /// How long a cached health verdict stays authoritative.
    pub health_cache_ttl_secs: u64,
    /// Per-request transport timeout.
    pub request_timeout_secs: u64,

    /// Span used when a caller passes a non-positive max span.
    pub default_max_span_days: i64,
    /// Hard cap on segments per window; protects against pathological input.
    pub max_segments: usize,
    /// Density estimate used for per-segment expected counts.
    pub expected_events_per_day: u32,
    pub min_events_per_segment: u32,
    /// Intelligent segmentation shrinks spans so no segment expects more.
    pub max_events_per_segment: u32,

    /// When false, the dispatcher processes segments sequentially.
    pub parallel: bool,
    /// Wall-clock budget per segment in a batch; the batch deadline is
    /// `segment_count * segment_timeout_secs`.
    pub segment_timeout_secs: u64,

    pub max_tokens: u32,
    /// Token budget for the large-payload call path.
    pub large_max_tokens: u32,
    pub temperature: f64,

    /// Which windows require the web-search-capable endpoint.
    pub search_policy: SearchPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: 1_000,
            max_retry_delay_ms: 10_000,
            max_retries: 3,
            health_cache_ttl_secs: 300,
            request_timeout_secs: 60,
            default_max_span_days: 7,
            max_segments: 10,
            expected_events_per_day: 10,
            min_events_per_segment: 5,
            max_events_per_segment: 50,
            parallel: true,
            segment_timeout_secs: 30,
            max_tokens: 2_000,
            large_max_tokens: 4_000,
            temperature: 0.7,
            search_policy: SearchPolicy::Always,
        }
    }
}

/// Top-level on-disk configuration: tunables plus the two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    pub endpoints: Endpoints,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {}", path.display(), e))?;
        Ok(config)
    }
}
