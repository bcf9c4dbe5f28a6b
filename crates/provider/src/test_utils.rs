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

//! Test doubles for the remote provider.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use chainrelay_types::{ErrorObject, RpcError, RpcRequest, RpcResult, B256};
use chainrelay_utils::json_rpc::METHOD_NOT_FOUND_CODE;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::RemoteProvider;

/// Deterministic block hash for block `number`
pub fn fake_hash(number: u64) -> B256 {
    B256::left_padding_from(&number.to_be_bytes())
}

/// A minimal JSON-RPC block object for block `number`
pub fn fake_block(number: u64) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "hash": fake_hash(number),
        "parentHash": fake_hash(number.saturating_sub(1)),
        "transactions": [],
    })
}

/// A scripted remote provider.
///
/// Each method answers from its queue of one-shot responses first, then from its sticky
/// response. Head polls (`eth_getBlockByNumber("latest")`) are scripted separately with
/// [`FakeProvider::push_head`] and [`FakeProvider::set_head`], and are neither counted
/// as calls nor recorded as requests.
#[derive(Debug, Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    queued: HashMap<String, VecDeque<RpcResult>>,
    sticky: HashMap<String, RpcResult>,
    queued_heads: VecDeque<RpcResult>,
    head: Option<RpcResult>,
    calls: HashMap<String, usize>,
    head_polls: usize,
    requests: Vec<RpcRequest>,
    latency: Option<Duration>,
}

impl FakeProvider {
    /// Answer every call to `method` with `value` once the queue is drained
    pub fn set_response(&self, method: &str, value: Value) {
        self.state.lock().sticky.insert(method.to_string(), Ok(value));
    }

    /// Fail every call to `method` with `error` once the queue is drained
    pub fn set_error(&self, method: &str, error: RpcError) {
        self.state
            .lock()
            .sticky
            .insert(method.to_string(), Err(error));
    }

    /// Answer the next unanswered call to `method` with `result`
    pub fn push_response(&self, method: &str, result: RpcResult) {
        self.state
            .lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    /// Report head `number` on every poll once the head queue is drained
    pub fn set_head(&self, number: u64) {
        self.state.lock().head = Some(Ok(fake_block(number)));
    }

    /// Report head `number` on the next poll
    pub fn push_head(&self, number: u64) {
        self.state.lock().queued_heads.push_back(Ok(fake_block(number)));
    }

    /// Fail the next poll with `error`
    pub fn push_head_error(&self, error: RpcError) {
        self.state.lock().queued_heads.push_back(Err(error));
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Number of calls made to `method`, head polls excluded
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Number of head polls made
    pub fn head_polls(&self) -> usize {
        self.state.lock().head_polls
    }

    /// Every request received, head polls excluded, oldest first
    pub fn requests(&self) -> Vec<RpcRequest> {
        self.state.lock().requests.clone()
    }

    fn answer(&self, request: &RpcRequest) -> (RpcResult, Option<Duration>) {
        let mut state = self.state.lock();
        let latency = state.latency;

        if is_head_poll(request) {
            state.head_polls += 1;
            let result = match state.queued_heads.pop_front() {
                Some(result) => result,
                None => state
                    .head
                    .clone()
                    .unwrap_or_else(|| Err(RpcError::Transport("no head scripted".to_string()))),
            };
            return (result, latency);
        }

        *state.calls.entry(request.method.clone()).or_default() += 1;
        state.requests.push(request.clone());
        let queued = state
            .queued
            .get_mut(&request.method)
            .and_then(VecDeque::pop_front);
        let result = match queued {
            Some(result) => result,
            None => state.sticky.get(&request.method).cloned().unwrap_or_else(|| {
                Err(RpcError::ErrorResp(ErrorObject::new(
                    METHOD_NOT_FOUND_CODE,
                    format!("the method {} does not exist/is not available", request.method),
                )))
            }),
        };
        (result, latency)
    }
}

fn is_head_poll(request: &RpcRequest) -> bool {
    request.method == "eth_getBlockByNumber" && request.param(0) == Some(&json!("latest"))
}

#[async_trait::async_trait]
impl RemoteProvider for FakeProvider {
    async fn request(&self, request: RpcRequest) -> RpcResult {
        let (result, latency) = self.answer(&request);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        result
    }
}
