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

//! The request pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] stages in front of a
//! [`RemoteProvider`]. Each stage receives the request and a [`Next`] handle; it may
//! answer on its own, pass a (possibly rewritten) request on with [`Next::run`], or
//! inspect what came back from downstream before returning it.

use std::{fmt, sync::Arc};

use chainrelay_types::{RpcRequest, RpcResponse, RpcResult};
use chainrelay_utils::json_rpc::NIL_SENTINEL;
use serde_json::Value;

use crate::RemoteProvider;

mod block_cache;
pub use block_cache::BlockCacheMiddleware;
mod block_ref;
pub use block_ref::BlockRefMiddleware;
mod inflight;
pub use inflight::InflightMiddleware;
mod inspector;
pub use inspector::BlockTrackerInspectorMiddleware;
mod retry_empty;
pub use retry_empty::RetryOnEmptyMiddleware;

/// A pipeline stage
#[async_trait::async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Handle `request`, calling `next.run(..)` to proceed downstream
    async fn handle(&self, request: RpcRequest, next: Next) -> RpcResult;

    /// Stage name, for logs
    fn name(&self) -> &'static str;
}

/// The remainder of the pipeline after the current stage.
///
/// Cloning lets a stage run the rest of the pipeline more than once.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Middleware>]>,
    provider: Arc<dyn RemoteProvider>,
    index: usize,
}

impl Next {
    /// Pass `request` to the next stage, or to the remote provider after the last stage
    pub async fn run(self, request: RpcRequest) -> RpcResult {
        match self.stages.get(self.index).cloned() {
            Some(stage) => {
                let next = Next {
                    index: self.index + 1,
                    ..self
                };
                stage.handle(request, next).await
            }
            None => self.provider.request(request).await,
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("stage", &self.stages.get(self.index).map(|s| s.name()))
            .finish()
    }
}

/// Stages composed in front of a remote provider
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Middleware>]>,
    provider: Arc<dyn RemoteProvider>,
}

impl Pipeline {
    /// Start building a pipeline that terminates at `provider`
    pub fn builder(provider: Arc<dyn RemoteProvider>) -> PipelineBuilder {
        PipelineBuilder {
            stages: vec![],
            provider,
        }
    }

    /// Run a request through every stage
    pub async fn handle(&self, request: RpcRequest) -> RpcResult {
        Next {
            stages: self.stages.clone(),
            provider: self.provider.clone(),
            index: 0,
        }
        .run(request)
        .await
    }

    /// Run a request through every stage and wrap the outcome in a response carrying the
    /// caller's id
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        RpcResponse::from_result(id, self.handle(request).await)
    }

    /// Names of the stages, outermost first
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Middleware>>,
    provider: Arc<dyn RemoteProvider>,
}

impl PipelineBuilder {
    /// Append a stage. Stages run in the order they are added.
    pub fn stage(mut self, stage: impl Middleware) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Finish the pipeline
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
            provider: self.provider,
        }
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// True for results that mean "no data": `null` or the `"<nil>"` sentinel
pub(crate) fn is_empty_result(result: &Value) -> bool {
    match result {
        Value::Null => true,
        Value::String(s) => s == NIL_SENTINEL,
        _ => false,
    }
}

/// Identity of a request for caching and deduplication: method and parameters, not the id
pub(crate) fn fingerprint(request: &RpcRequest) -> String {
    format!("{}:{}", request.method, Value::Array(request.params.clone()))
}
