//! Retrying backend invoker with health-aware endpoint selection.
//!
//! All network access funnels through [`ApiClient`]. Its call paths never
//! raise in the steady state: exhausted retries, auth rejection, and
//! interruption all surface as `None`, which callers treat as "this attempt
//! produced nothing usable" and handle with their own fallback. Every
//! attempt, success or failure, is reported to the accounting sink.

use crate::accounting::{CallSink, CallStats, CallStatsSnapshot, NoopSink};
use crate::config::{Config, EndpointConfig, Endpoints, FetchConfig};
use crate::health::HealthMonitor;
use crate::model::{now, AttemptOutcome, CallAttempt, TimeSegment, Usage};
use crate::parse::is_response_complete;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Extra attempts when a call succeeds but the payload looks truncated.
const LARGE_CALL_RETRIES: u32 = 2;

/// Retry budget for the primary endpoint in the fallback path, and the
/// smaller budget for the alternate.
const FALLBACK_PRIMARY_RETRIES: u32 = 2;
const FALLBACK_ALTERNATE_RETRIES: u32 = 1;

/// Trivial prompt for health probes; anything parseable back proves the
/// endpoint is alive and the credential works.
const HEALTH_PROBE_PROMPT: &str = "Reply with the single word OK.";
const HEALTH_PROBE_TOKENS: u32 = 16;

/// System message for the non-search endpoint; the search-capable endpoint
/// rejects system roles and takes its instructions inline.
const SYSTEM_PROMPT: &str = "You are a precise event retrieval assistant. \
    Answer only with the requested JSON structure.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search: Option<WebSearchOptions>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WebSearchOptions {
    enable: bool,
    max_results: u32,
    /// Milliseconds granted to the backend's own search step.
    timeout: u64,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    /// Null in some refusal/error responses.
    #[serde(default)]
    content: Option<String>,
}

/// Failure classification driving the retry loop.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// Network trouble, 5xx, malformed or empty body. Worth another try.
    Retryable(String),
    /// Credential problems never heal on retry; abort immediately.
    NonRetryable(String),
}

impl AttemptError {
    fn message(&self) -> &str {
        match self {
            AttemptError::Retryable(msg) | AttemptError::NonRetryable(msg) => msg,
        }
    }
}

/// Markers in backend error text that make a failure not worth retrying.
pub(crate) fn is_auth_failure_text(text: &str) -> bool {
    text.contains("401")
        || text.contains("403")
        || text.contains("Invalid API key")
        || text.contains("Authentication failed")
}

/// Backoff before retry `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
pub(crate) fn backoff_delay_ms(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(max_ms)
}

/// Shared retry skeleton: sleep-then-attempt up to `max_retries` extra
/// times, short-circuiting on the first non-retryable failure. Returns
/// `None` on exhaustion; cancellation simply drops the in-flight future.
pub(crate) async fn run_retry_loop<F, Fut>(
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    mut attempt_fn: F,
) -> Option<String>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<String, AttemptError>>,
{
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay_ms(base_delay_ms, max_delay_ms, attempt);
            debug!(attempt, delay_ms = delay, "backing off before retry");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        match attempt_fn(attempt).await {
            Ok(content) => return Some(content),
            Err(AttemptError::NonRetryable(msg)) => {
                error!(error = %msg, "non-retryable failure, aborting retries");
                return None;
            }
            Err(AttemptError::Retryable(msg)) => {
                warn!(attempt, max_retries, error = %msg, "call attempt failed");
            }
        }
    }
    None
}

/// Client over the two backend endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    fetch: FetchConfig,
    endpoints: Endpoints,
    health: HealthMonitor,
    sink: Arc<dyn CallSink>,
    stats: CallStats,
}

impl ApiClient {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_sink(config, Arc::new(NoopSink))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn CallSink>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch.request_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {}", e))?;
        let health = HealthMonitor::new(Duration::from_secs(config.fetch.health_cache_ttl_secs));
        Ok(Self {
            http,
            fetch: config.fetch,
            endpoints: config.endpoints,
            health,
            sink,
            stats: CallStats::default(),
        })
    }

    pub fn fetch_config(&self) -> &FetchConfig {
        &self.fetch
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn stats(&self) -> CallStatsSnapshot {
        self.stats.snapshot()
    }

    /// Operational recovery: force fresh probes on the next selection.
    pub fn reset_health_cache(&self) {
        self.health.reset();
    }

    /// Pick the endpoint for a window: capability per the configured search
    /// policy, falling back to the alternate when the preferred endpoint is
    /// unhealthy. When both are unhealthy the preferred one is returned
    /// anyway so the caller observes the concrete failure; selection itself
    /// never errors.
    pub async fn select_endpoint(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> &EndpointConfig {
        let use_search = self.fetch.search_policy.requires_web_search(start, end);
        let preferred = self.endpoints.for_capability(use_search);

        if self.is_healthy(preferred).await {
            debug!(api = preferred.api_type(), "selected preferred endpoint");
            return preferred;
        }

        let fallback = self.endpoints.alternate(preferred);
        if self.is_healthy(fallback).await {
            warn!(
                preferred = preferred.api_type(),
                fallback = fallback.api_type(),
                "preferred endpoint unhealthy, switching to alternate"
            );
            return fallback;
        }

        error!("both endpoints unhealthy, returning preferred");
        preferred
    }

    /// Cached health verdict, probing when the cache has expired. A missing
    /// or placeholder credential is unhealthy without a network call.
    pub async fn is_healthy(&self, config: &EndpointConfig) -> bool {
        let key = config.api_type();
        if let Some(verdict) = self.health.cached_verdict(key) {
            return verdict;
        }

        let healthy = if !config.has_usable_key() {
            false
        } else {
            self.probe(config).await
        };
        self.health.record(key, healthy);
        healthy
    }

    async fn probe(&self, config: &EndpointConfig) -> bool {
        self.call_once(
            config,
            HEALTH_PROBE_PROMPT,
            HEALTH_PROBE_TOKENS,
            false,
            "health-check",
            None,
            0,
        )
        .await
        .is_ok()
    }

    /// One logical call against `config` with the configured retry budget.
    pub async fn call(
        &self,
        config: &EndpointConfig,
        prompt: &str,
        request_id: &str,
    ) -> Option<String> {
        self.call_with_retry(config, prompt, self.fetch.max_retries, request_id)
            .await
    }

    /// One logical call with bounded retries and exponential backoff.
    pub async fn call_with_retry(
        &self,
        config: &EndpointConfig,
        prompt: &str,
        max_retries: u32,
        request_id: &str,
    ) -> Option<String> {
        self.stats.record_started();

        let outcome = run_retry_loop(
            max_retries,
            self.fetch.base_retry_delay_ms,
            self.fetch.max_retry_delay_ms,
            |attempt| async move {
                if attempt > 0 {
                    self.stats.record_retry();
                    info!(attempt, max_retries, request_id, "retrying call");
                }
                self.call_once(config, prompt, self.fetch.max_tokens, false, request_id, None, attempt)
                    .await
            },
        )
        .await;

        match &outcome {
            Some(_) => self.stats.record_success(),
            None => {
                self.stats.record_failure();
                error!(max_retries, request_id, "call failed after all retries");
            }
        }
        outcome
    }

    /// Large-payload variant: a raised token budget plus a completeness
    /// check that converts "succeeded but obviously truncated" into a
    /// retryable condition, bounded to two extra attempts.
    pub async fn call_with_large_tokens(
        &self,
        config: &EndpointConfig,
        prompt: &str,
        max_tokens: u32,
        segment: &TimeSegment,
    ) -> Option<String> {
        let request_id = format!("large_tokens_{}", segment.id);
        self.stats.record_started();

        let outcome = run_retry_loop(
            LARGE_CALL_RETRIES,
            self.fetch.base_retry_delay_ms,
            self.fetch.max_retry_delay_ms,
            |attempt| {
                let request_id = request_id.as_str();
                async move {
                    if attempt > 0 {
                        self.stats.record_retry();
                    }
                    let content = self
                        .call_once(
                            config,
                            prompt,
                            max_tokens,
                            true,
                            request_id,
                            Some(&segment.id),
                            attempt,
                        )
                        .await?;
                    if is_response_complete(&content, segment.expected_count) {
                        Ok(content)
                    } else {
                        Err(AttemptError::Retryable(format!(
                            "incomplete response for segment {}",
                            segment.id
                        )))
                    }
                }
            },
        )
        .await;

        match &outcome {
            Some(_) => self.stats.record_success(),
            None => {
                self.stats.record_failure();
                error!(%request_id, "large-token call failed after all retries");
            }
        }
        outcome
    }

    /// Select, call, and on total failure retry once more against the
    /// alternate endpoint with a smaller budget.
    pub async fn call_with_fallback(
        &self,
        prompt: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        request_id: &str,
    ) -> Option<String> {
        let primary = self.select_endpoint(start, end).await;
        if let Some(response) = self
            .call_with_retry(primary, prompt, FALLBACK_PRIMARY_RETRIES, request_id)
            .await
        {
            return Some(response);
        }

        warn!(request_id, primary = primary.api_type(), "primary endpoint failed, trying alternate");
        let alternate = self.endpoints.alternate(primary);
        let response = self
            .call_with_retry(alternate, prompt, FALLBACK_ALTERNATE_RETRIES, request_id)
            .await;
        match &response {
            Some(_) => info!(request_id, "alternate endpoint succeeded"),
            None => error!(request_id, "all endpoints failed"),
        }
        response
    }

    /// One network attempt. Reports itself to the accounting sink whatever
    /// the outcome; sink failures are the sink's problem, never ours.
    async fn call_once(
        &self,
        config: &EndpointConfig,
        prompt: &str,
        max_tokens: u32,
        widened_search: bool,
        request_id: &str,
        segment_id: Option<&str>,
        attempt: u32,
    ) -> Result<String, AttemptError> {
        let started_at = now();
        let timer = Instant::now();

        let result = self
            .execute(config, prompt, max_tokens, widened_search)
            .await;

        let (outcome, token_usage, error) = match &result {
            Ok((_, tokens)) => (AttemptOutcome::Success, *tokens, None),
            Err(err) => (AttemptOutcome::Failed, 0, Some(err.message().to_string())),
        };
        self.sink.record_call(&CallAttempt {
            request_id: request_id.to_string(),
            segment_id: segment_id.map(String::from),
            api_type: config.api_type(),
            attempt,
            started_at,
            duration_ms: timer.elapsed().as_millis() as u64,
            outcome,
            token_usage,
            error,
        });

        result.map(|(content, _)| content)
    }

    async fn execute(
        &self,
        config: &EndpointConfig,
        prompt: &str,
        max_tokens: u32,
        widened_search: bool,
    ) -> Result<(String, u32), AttemptError> {
        let body = build_request_body(config, &self.fetch, prompt, max_tokens, widened_search);

        let response = self
            .http
            .post(&config.url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Retryable(format!("failed to read body: {e}")))?;

        extract_content(config.api_type(), status, &text)
    }
}

/// Classify one HTTP response and pull the content out of a successful one.
///
/// The auth-marker scan applies to error bodies only; a 2xx payload is
/// trusted even when its content happens to mention "401" or "403".
fn extract_content(
    api_type: &'static str,
    status: reqwest::StatusCode,
    text: &str,
) -> Result<(String, u32), AttemptError> {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(AttemptError::NonRetryable(format!(
            "authentication rejected by {api_type}: status={status}"
        )));
    }
    if !status.is_success() {
        // Some backends bury the auth rejection in an error body behind a
        // generic status.
        if is_auth_failure_text(text) {
            return Err(AttemptError::NonRetryable(format!(
                "authentication rejected by {api_type}: {status} with auth error body"
            )));
        }
        return Err(AttemptError::Retryable(format!(
            "backend returned {status}"
        )));
    }

    // A structurally malformed body is a retryable failure.
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| AttemptError::Retryable(format!("malformed response body: {e}")))?;

    let content = parsed
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(AttemptError::Retryable("empty content in response".into()));
    }

    let tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);
    Ok((content, tokens))
}

/// Request body shaped to the endpoint's capability: web-search endpoints
/// get a search sub-object (widened limits on the large-payload path),
/// non-search endpoints get a system message and sampling parameters.
fn build_request_body<'a>(
    config: &'a EndpointConfig,
    fetch: &FetchConfig,
    prompt: &'a str,
    max_tokens: u32,
    widened_search: bool,
) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    let mut temperature = None;
    let mut web_search = None;

    if config.supports_web_search {
        web_search = Some(WebSearchOptions {
            enable: true,
            max_results: if widened_search { 15 } else { 10 },
            timeout: if widened_search { 45_000 } else { 30_000 },
        });
    } else {
        messages.push(Message {
            role: "system",
            content: SYSTEM_PROMPT,
        });
        temperature = Some(fetch.temperature);
    }
    messages.push(Message {
        role: "user",
        content: prompt,
    });

    ChatRequest {
        model: &config.model,
        max_tokens,
        temperature,
        messages,
        web_search,
    }
}
