// This file is part of Chainrelay.
//
// Chainrelay is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Chainrelay is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Chainrelay.
// If not, see https://www.gnu.org/licenses/.

//! Retry-on-empty stage.
//!
//! A node that lags the chain head answers `null` for data it has not indexed yet. Reads
//! at or below the tracked head that come back empty are retried a bounded number of
//! times, confirming between attempts that the head has not regressed. If every attempt is
//! empty the empty result is final.
//!
//! Reads with no block parameter, such as a transaction lookup by hash, are only retried
//! when the tracker has moved to a newer head since the request was issued. A still
//! pending transaction is answered right away.

use std::{fmt, sync::Arc};

use chainrelay_types::{BlockHead, MethodTable, RpcRequest, RpcResult};
use metrics::Counter;
use metrics_derive::Metrics;
use tracing::{debug, warn};

use super::{
    block_ref::{classify_block_param, BlockParam},
    is_empty_result, Middleware, Next,
};
use crate::{BlockTracker, RetrySettings};

/// Re-issues block-addressed reads that come back empty
pub struct RetryOnEmptyMiddleware {
    methods: Arc<MethodTable>,
    tracker: BlockTracker,
    settings: RetrySettings,
    metrics: RetryOnEmptyMetrics,
}

#[derive(Metrics)]
#[metrics(scope = "retry_on_empty")]
struct RetryOnEmptyMetrics {
    #[metric(describe = "the count of retries after an empty result.")]
    retries: Counter,
    #[metric(describe = "the count of requests still empty after every attempt.")]
    exhausted: Counter,
}

impl fmt::Debug for RetryOnEmptyMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOnEmptyMiddleware")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum RetryPolicy {
    /// Retry on a fixed interval while the head holds
    Bounded,
    /// Retry once per head advance
    OnNewHead,
    Skip,
}

impl RetryOnEmptyMiddleware {
    /// Create the stage
    pub fn new(methods: Arc<MethodTable>, tracker: BlockTracker, settings: RetrySettings) -> Self {
        Self {
            methods,
            tracker,
            settings,
            metrics: RetryOnEmptyMetrics::default(),
        }
    }

    /// Block numbers the tracker has already seen get bounded retries, reads without a
    /// block parameter wait for a new head. Hashes and unresolved tags are left alone.
    async fn policy(&self, request: &RpcRequest) -> RetryPolicy {
        let spec = self.methods.get(&request.method);
        if !spec.retry_on_empty {
            return RetryPolicy::Skip;
        }
        match classify_block_param(spec, request) {
            BlockParam::None => RetryPolicy::OnNewHead,
            BlockParam::Concrete(block) => {
                let Some(number) = block.number() else {
                    return RetryPolicy::Skip;
                };
                match self.tracker.get_latest_block().await {
                    Ok(head) if number <= head.number => RetryPolicy::Bounded,
                    Ok(_) => RetryPolicy::Skip,
                    Err(error) => {
                        warn!(method = %request.method, "no head, not retrying: {error}");
                        RetryPolicy::Skip
                    }
                }
            }
            _ => RetryPolicy::Skip,
        }
    }

    /// The head between attempts. Shares the tracker's polls, so it only hits the network
    /// once the tracked head has gone stale.
    async fn refresh_head(&self) -> Option<BlockHead> {
        match self.tracker.get_latest_block().await {
            Ok(head) => Some(head),
            Err(error) => {
                debug!("head refresh between retries failed: {error}");
                self.tracker.get_current_block()
            }
        }
    }

    async fn retry_bounded(&self, request: RpcRequest, next: Next) -> RpcResult {
        let mut result = next.clone().run(request.clone()).await?;
        let mut baseline = self.tracker.get_current_block();
        let mut attempt = 1;
        while is_empty_result(&result) && attempt < self.settings.max_attempts {
            self.metrics.retries.increment(1);
            debug!(method = %request.method, attempt, "empty result, retrying");
            tokio::time::sleep(self.settings.interval).await;

            let head = self.refresh_head().await;
            if let (Some(baseline), Some(head)) = (baseline, head) {
                if head.number < baseline.number {
                    debug!(
                        method = %request.method,
                        baseline = baseline.number,
                        head = head.number,
                        "head regressed, returning empty result"
                    );
                    return Ok(result);
                }
            }
            baseline = baseline.or(head);

            result = next.clone().run(request.clone()).await?;
            attempt += 1;
        }

        if is_empty_result(&result) && attempt > 1 {
            self.metrics.exhausted.increment(1);
            warn!(
                method = %request.method,
                attempts = attempt,
                "result still empty after retries"
            );
        }
        Ok(result)
    }

    async fn retry_on_new_head(&self, request: RpcRequest, next: Next) -> RpcResult {
        let issued_at = self.tracker.get_current_block();
        let mut result = next.clone().run(request.clone()).await?;
        let Some(mut seen) = issued_at else {
            return Ok(result);
        };
        let mut attempt = 1;
        while is_empty_result(&result) && attempt < self.settings.max_attempts {
            let head = match self.tracker.get_latest_block().await {
                Ok(head) => head,
                Err(error) => {
                    debug!(method = %request.method, "no head, not retrying: {error}");
                    break;
                }
            };
            if head.number <= seen.number {
                break;
            }
            self.metrics.retries.increment(1);
            debug!(
                method = %request.method,
                attempt,
                head = head.number,
                "empty result, retrying against new head"
            );
            seen = head;
            result = next.clone().run(request.clone()).await?;
            attempt += 1;
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl Middleware for RetryOnEmptyMiddleware {
    async fn handle(&self, request: RpcRequest, next: Next) -> RpcResult {
        match self.policy(&request).await {
            RetryPolicy::Bounded => self.retry_bounded(request, next).await,
            RetryPolicy::OnNewHead => self.retry_on_new_head(request, next).await,
            RetryPolicy::Skip => next.run(request).await,
        }
    }

    fn name(&self) -> &'static str {
        "retry-on-empty"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::future::join;
    use serde_json::{json, Value};
    use tokio::time::Instant;

    use super::*;
    use crate::{
        test_utils::FakeProvider, Id, Pipeline, RpcError, TokioPlatform, TrackerSettings,
    };

    const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

    fn setup(head: u64) -> (Arc<FakeProvider>, BlockTracker, Pipeline) {
        setup_with(head, RetrySettings::default())
    }

    fn setup_with(
        head: u64,
        settings: RetrySettings,
    ) -> (Arc<FakeProvider>, BlockTracker, Pipeline) {
        let provider = Arc::new(FakeProvider::default());
        provider.set_head(head);
        let tracker = BlockTracker::new(
            provider.clone(),
            Arc::new(TokioPlatform),
            TrackerSettings::default(),
        );
        let pipeline = Pipeline::builder(provider.clone())
            .stage(RetryOnEmptyMiddleware::new(
                Arc::new(MethodTable::builtin()),
                tracker.clone(),
                settings,
            ))
            .build();
        (provider, tracker, pipeline)
    }

    fn request(method: &str, params: Vec<Value>) -> RpcRequest {
        RpcRequest::new(Id::Number(1), method, params)
    }

    fn tx_hash() -> String {
        format!("0x{}", "ab".repeat(32))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_found() {
        let (provider, _, pipeline) = setup(100);
        provider.push_response("eth_getCode", Ok(Value::Null));
        provider.push_response("eth_getCode", Ok(json!("<nil>")));
        provider.set_response("eth_getCode", json!("0x6080"));

        let start = Instant::now();
        let result = pipeline
            .handle(request("eth_getCode", vec![json!(ADDRESS), json!("0x64")]))
            .await;
        assert_eq!(result, Ok(json!("0x6080")));
        assert_eq!(provider.calls("eth_getCode"), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
        // the head stayed fresh, so retries reused it
        assert_eq!(provider.head_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_empty() {
        let (provider, _, pipeline) = setup(100);
        provider.set_response("eth_getCode", Value::Null);

        let result = pipeline
            .handle(request("eth_getCode", vec![json!(ADDRESS), json!("0x64")]))
            .await;
        assert_eq!(result, Ok(Value::Null));
        assert_eq!(provider.calls("eth_getCode"), RetrySettings::default().max_attempts as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_above_head_not_retried() {
        let (provider, _, pipeline) = setup(100);
        provider.set_response("eth_getCode", Value::Null);

        let result = pipeline
            .handle(request("eth_getCode", vec![json!(ADDRESS), json!("0x65")]))
            .await;
        assert_eq!(result, Ok(Value::Null));
        assert_eq!(provider.calls("eth_getCode"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tags_and_hashes_not_retried() {
        let (provider, _, pipeline) = setup(100);
        provider.set_response("eth_getCode", Value::Null);
        let hash = format!("0x{}", "cd".repeat(32));

        for block in [json!("pending"), json!({ "blockHash": hash })] {
            pipeline
                .handle(request("eth_getCode", vec![json!(ADDRESS), block]))
                .await
                .unwrap();
        }
        assert_eq!(provider.calls("eth_getCode"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_not_retried() {
        let (provider, _, pipeline) = setup(100);
        provider.set_error("eth_getBalance", RpcError::Timeout);

        let result = pipeline
            .handle(request("eth_getBalance", vec![json!(ADDRESS), json!("0x64")]))
            .await;
        assert_eq!(result, Err(RpcError::Timeout));
        assert_eq!(provider.calls("eth_getBalance"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_head_regresses() {
        // waits long enough between attempts for the tracked head to go stale
        let settings = RetrySettings {
            max_attempts: 10,
            interval: Duration::from_secs(30),
        };
        let (provider, tracker, pipeline) = setup_with(100, settings);
        provider.set_response("eth_getBalance", Value::Null);
        tracker.get_latest_block().await.unwrap();
        provider.push_head(99);

        let result = pipeline
            .handle(request("eth_getBalance", vec![json!(ADDRESS), json!("0x63")]))
            .await;
        assert_eq!(result, Ok(Value::Null));
        assert_eq!(provider.calls("eth_getBalance"), 1);
        assert_eq!(provider.head_polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_receipt_with_static_head_answers_at_once() {
        let (provider, tracker, pipeline) = setup(100);
        tracker.get_latest_block().await.unwrap();
        provider.set_response("eth_getTransactionReceipt", Value::Null);

        let start = Instant::now();
        let result = pipeline
            .handle(request("eth_getTransactionReceipt", vec![json!(tx_hash())]))
            .await;
        assert_eq!(result, Ok(Value::Null));
        assert_eq!(provider.calls("eth_getTransactionReceipt"), 1);
        assert_eq!(provider.head_polls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_head_yet_answers_at_once() {
        let (provider, _, pipeline) = setup(100);
        provider.set_response("eth_getTransactionReceipt", Value::Null);

        let result = pipeline
            .handle(request("eth_getTransactionReceipt", vec![json!(tx_hash())]))
            .await;
        assert_eq!(result, Ok(Value::Null));
        assert_eq!(provider.calls("eth_getTransactionReceipt"), 1);
        assert_eq!(provider.head_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_block_param_retried_once_head_advances() {
        let (provider, tracker, pipeline) = setup(100);
        tracker.get_latest_block().await.unwrap();

        let transaction = json!({ "hash": tx_hash(), "blockNumber": "0x65" });
        provider.push_response("eth_getTransactionByHash", Ok(Value::Null));
        provider.set_response("eth_getTransactionByHash", transaction.clone());
        provider.set_latency(Duration::from_secs(1));
        provider.set_head(101);

        // the tracker sees 101 while the first lookup is still in flight
        let (head, result) = join(tracker.check_for_latest_block(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            pipeline
                .handle(request("eth_getTransactionByHash", vec![json!(tx_hash())]))
                .await
        })
        .await;

        assert_eq!(head.unwrap().number, 101);
        assert_eq!(result, Ok(transaction));
        assert_eq!(provider.calls("eth_getTransactionByHash"), 2);
        assert_eq!(provider.head_polls(), 2);
    }
}
