//! Bounded-concurrency batch execution with order-preserving results.
//!
//! The dispatcher fans a batch of segments out over a semaphore-bounded
//! pool and collects results into slots indexed by input position, so the
//! output order never depends on completion order. The whole batch runs
//! under a single wall-clock budget; when it expires the unfinished slots
//! stay `None` while completed ones are kept.

use crate::client::ApiClient;
use crate::model::TimeSegment;
use crate::parse::{interpret_response, ParseOutcome};
use crate::prompt::build_segment_prompt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Hard ceiling on pool width regardless of batch size.
const MAX_POOL_WIDTH: usize = 5;

/// Run `f` over every input with at most `max_parallel` in flight, under a
/// single deadline for the whole batch. Slot `i` of the result corresponds
/// to input `i`; slots whose task did not finish in time are `None`.
///
/// Tasks still running at the deadline are abandoned, not aborted: they
/// may finish in the background but can no longer report a result.
pub(crate) async fn run_batch_ordered<I, O, F, Fut>(
    inputs: Vec<I>,
    max_parallel: usize,
    budget: Duration,
    f: F,
) -> Vec<Option<O>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = O> + Send + 'static,
{
    let total = inputs.len();
    if total == 0 {
        return Vec::new();
    }

    let slots: Arc<Mutex<Vec<Option<O>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let f = Arc::new(f);

    let mut handles = Vec::with_capacity(total);
    for (index, input) in inputs.into_iter().enumerate() {
        let slots = Arc::clone(&slots);
        let semaphore = Arc::clone(&semaphore);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move {
            // Acquire inside the task so queueing counts against the
            // batch budget, not against the spawner.
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            let output = f(input).await;
            slots.lock().unwrap_or_else(|e| e.into_inner())[index] = Some(output);
        }));
    }

    // A panicked task surfaces as a JoinError here and leaves its slot None.
    let join_all = futures::future::join_all(handles);
    if tokio::time::timeout(budget, join_all).await.is_err() {
        warn!(budget_secs = budget.as_secs(), "batch budget expired with tasks still running");
    }

    // Take results out slot by slot; the storage keeps its length so a
    // straggler finishing after the deadline still writes in bounds.
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    slots.iter_mut().map(Option::take).collect()
}

/// Fetch and interpret every segment of a batch. Slot `i` holds the parse
/// outcome for segment `i`, or `None` when every endpoint and retry failed
/// or the batch budget expired first.
pub async fn dispatch_batch(
    client: Arc<ApiClient>,
    base_prompt: &str,
    segments: Vec<TimeSegment>,
) -> Vec<Option<ParseOutcome>> {
    let total = segments.len();
    if total == 0 {
        return Vec::new();
    }

    let fetch = client.fetch_config();
    let max_parallel = if fetch.parallel {
        total.min(MAX_POOL_WIDTH)
    } else {
        1
    };
    let budget = Duration::from_secs(fetch.segment_timeout_secs.saturating_mul(total as u64));
    let large_max_tokens = fetch.large_max_tokens;
    let base_prompt = base_prompt.to_string();

    info!(
        segments = total,
        max_parallel,
        budget_secs = budget.as_secs(),
        "dispatching segment batch"
    );

    let slots = run_batch_ordered(segments, max_parallel, budget, move |segment| {
        let client = Arc::clone(&client);
        let prompt = build_segment_prompt(&base_prompt, &segment);
        async move {
            let response = fetch_segment(&client, &prompt, large_max_tokens, &segment).await;
            match response {
                Some(raw) => Some(interpret_response(&raw, &segment)),
                None => {
                    warn!(segment = %segment.id, "segment produced no response");
                    None
                }
            }
        }
    })
    .await;

    // Outer None means the batch budget expired before the slot finished;
    // inner None means every endpoint and retry failed. Callers treat both
    // as a failed segment.
    slots.into_iter().map(Option::flatten).collect()
}

/// One segment: pick an endpoint, try the large-token path against it,
/// then fall back across endpoints with a plain retry budget.
async fn fetch_segment(
    client: &ApiClient,
    prompt: &str,
    large_max_tokens: u32,
    segment: &TimeSegment,
) -> Option<String> {
    let endpoint = client
        .select_endpoint(Some(segment.start), Some(segment.end))
        .await;
    debug!(segment = %segment.id, api = endpoint.api_type(), "fetching segment");

    if let Some(response) = client
        .call_with_large_tokens(endpoint, prompt, large_max_tokens, segment)
        .await
    {
        return Some(response);
    }

    warn!(segment = %segment.id, "large-token path exhausted, falling back across endpoints");
    client
        .call_with_fallback(
            prompt,
            Some(segment.start),
            Some(segment.end),
            &format!("fallback_{}", segment.id),
        )
        .await
}
