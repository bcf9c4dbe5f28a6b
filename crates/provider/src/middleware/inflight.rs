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

//! Inflight deduplication stage.
//!
//! Concurrent identical requests share one downstream call. The first caller becomes the
//! leader and runs the request, later callers wait for its outcome.

use std::{collections::HashMap, fmt, sync::Arc};

use chainrelay_types::{CacheStrategy, MethodTable, RpcError, RpcRequest, RpcResult};
use metrics::Counter;
use metrics_derive::Metrics;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::{fingerprint, Middleware, Next};

type InflightTable = Arc<Mutex<HashMap<String, Vec<oneshot::Sender<RpcResult>>>>>;

/// Collapses concurrent identical requests into one downstream call
pub struct InflightMiddleware {
    methods: Arc<MethodTable>,
    inflight: InflightTable,
    metrics: InflightMetrics,
}

#[derive(Metrics)]
#[metrics(scope = "inflight_dedup")]
struct InflightMetrics {
    #[metric(describe = "the count of requests that joined an inflight request.")]
    joined: Counter,
    #[metric(describe = "the count of requests sent downstream.")]
    led: Counter,
}

impl fmt::Debug for InflightMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflightMiddleware")
            .field("inflight", &self.inflight.lock().len())
            .finish_non_exhaustive()
    }
}

impl InflightMiddleware {
    /// Create the stage
    pub fn new(methods: Arc<MethodTable>) -> Self {
        Self {
            methods,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            metrics: InflightMetrics::default(),
        }
    }

    /// Number of distinct requests currently in flight
    pub fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Removes the table entry when the leader finishes, or if it never does
struct InflightGuard {
    table: InflightTable,
    key: Option<String>,
}

impl InflightGuard {
    /// Remove the entry and hand `result` to every waiting caller, in the order they joined.
    ///
    /// Removal happens under the table lock, so a request arriving now either joined
    /// before and receives this result, or starts a new entry.
    fn complete(mut self, result: &RpcResult) {
        let Some(key) = self.key.take() else {
            return;
        };
        let waiters = self.table.lock().remove(&key).unwrap_or_default();
        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), "broadcasting inflight result");
        }
        for waiter in waiters {
            // the waiter may have given up
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            // waiters see their sender dropped
            self.table.lock().remove(&key);
        }
    }
}

#[async_trait::async_trait]
impl Middleware for InflightMiddleware {
    async fn handle(&self, request: RpcRequest, next: Next) -> RpcResult {
        if self.methods.get(&request.method).cache == CacheStrategy::Never {
            return next.run(request).await;
        }

        let key = fingerprint(&request);
        let waiter = {
            let mut table = self.inflight.lock();
            match table.get_mut(&key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    table.insert(key.clone(), vec![]);
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            self.metrics.joined.increment(1);
            debug!(method = %request.method, "joined inflight request");
            return rx
                .await
                .unwrap_or_else(|_| Err(RpcError::Internal("inflight request abandoned".into())));
        }

        self.metrics.led.increment(1);
        let guard = InflightGuard {
            table: self.inflight.clone(),
            key: Some(key),
        };
        // runs to completion even if the leading caller goes away, waiters still need it
        let task = tokio::spawn(async move {
            let result = next.run(request).await;
            guard.complete(&result);
            result
        });
        task.await
            .unwrap_or_else(|e| Err(RpcError::Internal(format!("inflight request failed: {e}"))))
    }

    fn name(&self) -> &'static str {
        "inflight"
    }
}
