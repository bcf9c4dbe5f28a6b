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

//! Network client assembly.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chainrelay_types::{Id, MethodTable, NetworkSpec, RpcRequest, RpcResponse, RpcResult};
use serde_json::Value;
use tracing::info;

use crate::{
    middleware::{
        BlockCacheMiddleware, BlockRefMiddleware, BlockTrackerInspectorMiddleware,
        InflightMiddleware, RetryOnEmptyMiddleware,
    },
    new_http_provider, BlockTracker, Pipeline, Platform, RemoteProvider, TokioPlatform,
    TrackerSettings,
};

/// Block cache settings
#[derive(Clone, Copy, Debug)]
pub struct CacheSettings {
    /// Maximum number of cached responses
    pub capacity: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Retry-on-empty settings
#[derive(Clone, Copy, Debug)]
pub struct RetrySettings {
    /// Attempts per request, including the first
    pub max_attempts: u32,
    /// Wait between attempts
    pub interval: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// Tunables for a network client
#[derive(Clone, Copy, Debug, Default)]
pub struct Settings {
    /// Block tracker
    pub tracker: TrackerSettings,
    /// Block cache
    pub cache: CacheSettings,
    /// Retry-on-empty
    pub retry: RetrySettings,
    /// Client-side timeout for each request to the remote endpoint
    pub request_timeout: Option<Duration>,
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to build a [`NetworkClient`]
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Network to talk to
    pub network: NetworkSpec,
    /// Timer capability for the block tracker
    pub platform: Arc<dyn Platform>,
    /// Tunables
    pub settings: Settings,
    /// Method classification
    pub methods: Arc<MethodTable>,
}

impl ClientConfig {
    /// Config for `network` with default settings and the builtin method table
    pub fn new(network: NetworkSpec) -> Self {
        Self {
            network,
            platform: Arc::new(TokioPlatform),
            settings: Settings::default(),
            methods: Arc::new(MethodTable::builtin()),
        }
    }
}

/// A JSON-RPC client for one network: the request pipeline and its block tracker
#[derive(Clone, Debug)]
pub struct NetworkClient {
    network: NetworkSpec,
    pipeline: Pipeline,
    block_tracker: BlockTracker,
    next_id: Arc<AtomicU64>,
}

impl NetworkClient {
    /// Assemble the pipeline in front of `provider`.
    ///
    /// Stages, outermost first: block cache, inflight dedup, block reference
    /// normalization, retry-on-empty, block tracker inspector.
    pub fn with_provider(config: ClientConfig, provider: Arc<dyn RemoteProvider>) -> Self {
        let ClientConfig {
            network,
            platform,
            settings,
            methods,
        } = config;

        let block_tracker = BlockTracker::new(provider.clone(), platform, settings.tracker);
        let pipeline = Pipeline::builder(provider)
            .stage(BlockCacheMiddleware::new(
                methods.clone(),
                block_tracker.clone(),
                settings.cache.capacity,
            ))
            .stage(InflightMiddleware::new(methods.clone()))
            .stage(BlockRefMiddleware::new(
                methods.clone(),
                block_tracker.clone(),
            ))
            .stage(RetryOnEmptyMiddleware::new(
                methods,
                block_tracker.clone(),
                settings.retry,
            ))
            .stage(BlockTrackerInspectorMiddleware::new(block_tracker.clone()))
            .build();

        Self {
            network,
            pipeline,
            block_tracker,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run a caller's request; the response carries the caller's id
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        self.pipeline.dispatch(request).await
    }

    /// Convenience call with a client-assigned id
    pub async fn request(&self, method: &str, params: Vec<Value>) -> RpcResult {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pipeline
            .handle(RpcRequest::new(id, method, params))
            .await
    }

    /// The request pipeline
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The block tracker shared by the pipeline stages
    pub fn block_tracker(&self) -> &BlockTracker {
        &self.block_tracker
    }

    /// The network this client talks to
    pub fn network(&self) -> &NetworkSpec {
        &self.network
    }
}

/// Build a client talking JSON-RPC over HTTP to `config.network`'s endpoint
pub fn create_network_client(config: ClientConfig) -> anyhow::Result<NetworkClient> {
    let timeout = config
        .settings
        .request_timeout
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let provider = new_http_provider(&config.network.rpc_url, timeout)?;
    info!(
        network = %config.network.name,
        chain_id = %config.network.chain_id_hex(),
        "created network client"
    );
    Ok(NetworkClient::with_provider(config, Arc::new(provider)))
}
