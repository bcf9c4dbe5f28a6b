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

//! Block cache stage.
//!
//! Answers repeat reads from memory. Keys are taken after block reference normalization,
//! so an entry for a block number is valid forever and staleness comes only from `latest`
//! moving to a new number. Head-scoped methods are keyed by the current head instead.

use std::{fmt, sync::Arc};

use chainrelay_types::{CacheStrategy, MethodSpec, MethodTable, RpcRequest, RpcResult};
use chainrelay_utils::cache::LruMap;
use metrics::Counter;
use metrics_derive::Metrics;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    block_ref::{normalize, BlockParam},
    fingerprint, is_empty_result, Middleware, Next,
};
use crate::BlockTracker;

/// Caches responses to block-addressed and immutable reads
pub struct BlockCacheMiddleware {
    methods: Arc<MethodTable>,
    tracker: BlockTracker,
    cache: Mutex<LruMap<String, Value>>,
    metrics: BlockCacheMetrics,
}

#[derive(Metrics)]
#[metrics(scope = "block_cache")]
struct BlockCacheMetrics {
    #[metric(describe = "the count of requests answered from cache.")]
    hits: Counter,
    #[metric(describe = "the count of cacheable requests sent downstream.")]
    misses: Counter,
}

impl fmt::Debug for BlockCacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCacheMiddleware")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl BlockCacheMiddleware {
    /// Create the stage with room for `capacity` entries
    pub fn new(methods: Arc<MethodTable>, tracker: BlockTracker, capacity: u32) -> Self {
        Self {
            methods,
            tracker,
            cache: Mutex::new(LruMap::new(capacity)),
            metrics: BlockCacheMetrics::default(),
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Work out the cache key, normalizing the request if the key depends on its block.
    ///
    /// Returns no key when the request must bypass the cache.
    async fn prepare(
        &self,
        request: RpcRequest,
        spec: &MethodSpec,
    ) -> (RpcRequest, Option<String>) {
        match spec.cache {
            CacheStrategy::Never => (request, None),
            CacheStrategy::Permanent => {
                let key = fingerprint(&request);
                (request, Some(key))
            }
            CacheStrategy::Block => {
                let normalized = normalize(request, spec, &self.tracker).await;
                let cacheable = match normalized.block {
                    BlockParam::None => true,
                    block => block.is_concrete(),
                };
                let key = cacheable.then(|| fingerprint(&normalized.request));
                (normalized.request, key)
            }
            CacheStrategy::Head => match self.tracker.get_latest_block().await {
                Ok(head) => {
                    let key = format!("{:#x}@{}", head.number, fingerprint(&request));
                    (request, Some(key))
                }
                Err(error) => {
                    warn!(
                        method = %request.method,
                        "no head for cache key, bypassing cache: {error}"
                    );
                    (request, None)
                }
            },
        }
    }
}

/// Whether a successful result may be stored
fn is_cacheable(spec: &MethodSpec, result: &Value) -> bool {
    if is_empty_result(result) {
        return false;
    }
    if spec.require_block_hash {
        return result.get("blockHash").is_some_and(|hash| !hash.is_null());
    }
    true
}

#[async_trait::async_trait]
impl Middleware for BlockCacheMiddleware {
    async fn handle(&self, request: RpcRequest, next: Next) -> RpcResult {
        let spec = self.methods.get(&request.method);
        let (request, key) = self.prepare(request, spec).await;
        let Some(key) = key else {
            return next.run(request).await;
        };

        if let Some(hit) = self.cache.lock().get_cloned(&key) {
            self.metrics.hits.increment(1);
            debug!(method = %request.method, "block cache hit");
            return Ok(hit);
        }
        self.metrics.misses.increment(1);

        let result = next.run(request).await?;
        if is_cacheable(spec, &result) {
            self.cache.lock().insert(key, result.clone());
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "block-cache"
    }
}
