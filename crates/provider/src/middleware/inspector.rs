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

//! Block tracker inspector stage.
//!
//! If a response names a block above the tracked head, the answering node is ahead of the
//! tracker. The tracker is asked to poll right away so later requests pin `latest` to
//! the newer head.

use chainrelay_types::{RpcRequest, RpcResult};
use chainrelay_utils::log::LogOnError;
use serde_json::Value;
use tracing::{debug, Level};

use super::{Middleware, Next};
use crate::BlockTracker;

/// Refreshes the block tracker when a response proves it is behind
#[derive(Debug)]
pub struct BlockTrackerInspectorMiddleware {
    tracker: BlockTracker,
}

impl BlockTrackerInspectorMiddleware {
    /// Create the stage
    pub fn new(tracker: BlockTracker) -> Self {
        Self { tracker }
    }
}

/// The block number embedded in a transaction, receipt or block object
fn response_block_number(result: &Value) -> Option<u64> {
    let number = result
        .get("blockNumber")
        .or_else(|| result.get("number"))?
        .as_str()?;
    u64::from_str_radix(number.strip_prefix("0x")?, 16).ok()
}

#[async_trait::async_trait]
impl Middleware for BlockTrackerInspectorMiddleware {
    async fn handle(&self, request: RpcRequest, next: Next) -> RpcResult {
        let result = next.run(request).await?;

        let Some(number) = response_block_number(&result) else {
            return Ok(result);
        };
        if let Ok(Some(head)) = self
            .tracker
            .check_if_behind(number)
            .await
            .log_on_error_level(Level::WARN, "block tracker refresh failed")
        {
            debug!(
                response = number,
                polled = head.number,
                "response was ahead of tracked head, refreshed"
            );
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "block-tracker-inspector"
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use futures_util::future::join_all;
    use serde_json::json;

    use super::*;
    use crate::{
        test_utils::{fake_block, FakeProvider},
        Id, Pipeline, TokioPlatform, TrackerSettings,
    };

    fn setup() -> (Arc<FakeProvider>, BlockTracker, Pipeline) {
        let provider = Arc::new(FakeProvider::default());
        let tracker = BlockTracker::new(
            provider.clone(),
            Arc::new(TokioPlatform),
            TrackerSettings::default(),
        );
        let pipeline = Pipeline::builder(provider.clone())
            .stage(BlockTrackerInspectorMiddleware::new(tracker.clone()))
            .build();
        (provider, tracker, pipeline)
    }

    fn receipt(block: &str) -> Value {
        json!({ "transactionHash": format!("0x{}", "ab".repeat(32)), "blockNumber": block })
    }

    #[test]
    fn test_response_block_number() {
        assert_eq!(response_block_number(&receipt("0x65")), Some(101));
        assert_eq!(response_block_number(&fake_block(7)), Some(7));
        assert_eq!(response_block_number(&json!({ "blockNumber": null })), None);
        assert_eq!(response_block_number(&json!("0x65")), None);
    }

    #[tokio::test]
    async fn test_refreshes_when_response_ahead() {
        let (provider, tracker, pipeline) = setup();
        provider.set_head(100);
        tracker.get_latest_block().await.unwrap();
        assert_eq!(provider.head_polls(), 1);

        provider.set_head(101);
        provider.set_response("eth_getTransactionReceipt", receipt("0x65"));
        pipeline
            .handle(RpcRequest::new(
                Id::Number(1),
                "eth_getTransactionReceipt",
                vec![json!(format!("0x{}", "ab".repeat(32)))],
            ))
            .await
            .unwrap();

        assert_eq!(provider.head_polls(), 2);
        assert_eq!(tracker.get_current_block().unwrap().number, 101);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_responses_ahead_share_one_refresh() {
        let (provider, tracker, pipeline) = setup();
        provider.set_head(100);
        tracker.get_latest_block().await.unwrap();

        provider.set_latency(Duration::from_secs(1));
        provider.set_head(105);
        provider.set_response("eth_getTransactionReceipt", receipt("0x65"));
        let requests = (0..3).map(|id| {
            pipeline.handle(RpcRequest::new(
                Id::Number(id),
                "eth_getTransactionReceipt",
                vec![json!(format!("0x{}", "ab".repeat(32)))],
            ))
        });
        for result in join_all(requests).await {
            assert_eq!(result, Ok(receipt("0x65")));
        }

        assert_eq!(provider.head_polls(), 2);
        assert_eq!(tracker.get_current_block().unwrap().number, 105);
    }

    #[tokio::test]
    async fn test_no_refresh_when_response_behind() {
        let (provider, tracker, pipeline) = setup();
        provider.set_head(100);
        tracker.get_latest_block().await.unwrap();

        provider.set_response("eth_getTransactionReceipt", receipt("0x60"));
        pipeline
            .handle(RpcRequest::new(
                Id::Number(1),
                "eth_getTransactionReceipt",
                vec![json!(format!("0x{}", "ab".repeat(32)))],
            ))
            .await
            .unwrap();

        assert_eq!(provider.head_polls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_does_not_fail_request() {
        let (provider, tracker, pipeline) = setup();
        provider.set_head(100);
        tracker.get_latest_block().await.unwrap();

        provider.push_head_error(crate::RpcError::Transport("refused".to_string()));
        provider.set_response("eth_getTransactionByHash", receipt("0x70"));
        let result = pipeline
            .handle(RpcRequest::new(
                Id::Number(1),
                "eth_getTransactionByHash",
                vec![json!(format!("0x{}", "ab".repeat(32)))],
            ))
            .await;

        assert_eq!(result, Ok(receipt("0x70")));
        assert_eq!(tracker.get_current_block().unwrap().number, 100);
    }
}
