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

//! Block reference normalization.
//!
//! `latest` (or an omitted block parameter) is pinned to the tracker's head number,
//! `earliest` to block zero. `pending`, `safe` and `finalized` pass through untouched.

use std::sync::Arc;

use chainrelay_types::{
    block_number_param, BlockNumberOrTag, BlockRef, MethodSpec, MethodTable, RpcRequest,
    RpcResult,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::BlockTracker;

/// What a request's block parameter refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockParam {
    /// The method has no block parameter
    None,
    /// A specific block number or hash
    Concrete(BlockRef),
    /// `latest`, or the parameter was omitted
    Latest,
    /// `earliest`
    Earliest,
    /// `pending`, `safe` or `finalized`
    Volatile,
    /// Not a block reference we understand
    Unknown,
}

impl BlockParam {
    pub(crate) fn is_concrete(&self) -> bool {
        matches!(self, Self::Concrete(_))
    }
}

pub(crate) fn classify_block_param(spec: &MethodSpec, request: &RpcRequest) -> BlockParam {
    let Some(index) = spec.block_param else {
        return BlockParam::None;
    };
    let param = match request.param(index) {
        None | Some(Value::Null) => return BlockParam::Latest,
        Some(param) => param,
    };
    match BlockRef::from_param(param) {
        Some(BlockRef::Tag(BlockNumberOrTag::Latest)) => BlockParam::Latest,
        Some(BlockRef::Tag(BlockNumberOrTag::Earliest)) => BlockParam::Earliest,
        Some(BlockRef::Tag(
            BlockNumberOrTag::Pending | BlockNumberOrTag::Safe | BlockNumberOrTag::Finalized,
        )) => BlockParam::Volatile,
        Some(block) => BlockParam::Concrete(block),
        None => BlockParam::Unknown,
    }
}

/// A request after block reference normalization
#[derive(Debug)]
pub(crate) struct Normalized {
    pub(crate) request: RpcRequest,
    pub(crate) block: BlockParam,
}

/// Pin the request's block parameter to a concrete block where possible.
///
/// Numbers are rewritten to canonical hex so equivalent requests compare equal. If the
/// head is needed but cannot be fetched the request is returned unchanged.
pub(crate) async fn normalize(
    request: RpcRequest,
    spec: &MethodSpec,
    tracker: &BlockTracker,
) -> Normalized {
    let block = classify_block_param(spec, &request);
    let Some(index) = spec.block_param else {
        return Normalized { request, block };
    };

    let number = match block {
        BlockParam::Concrete(BlockRef::Tag(BlockNumberOrTag::Number(n))) => {
            // leave EIP-1898 objects as they are
            if request.param(index).is_some_and(Value::is_object) {
                return Normalized { request, block };
            }
            n
        }
        BlockParam::Earliest => 0,
        BlockParam::Latest => match tracker.get_latest_block().await {
            Ok(head) => head.number,
            Err(error) => {
                warn!(
                    method = %request.method,
                    "could not resolve latest block, forwarding unchanged: {error}"
                );
                return Normalized { request, block };
            }
        },
        _ => return Normalized { request, block },
    };

    let param = block_number_param(number);
    if request.param(index) == Some(&param) {
        return Normalized { request, block };
    }
    match request.with_param(index, param) {
        Some(rewritten) => {
            debug!(method = %request.method, number, "pinned block parameter");
            Normalized {
                request: rewritten,
                block: BlockParam::Concrete(BlockRef::Tag(BlockNumberOrTag::Number(number))),
            }
        }
        // earlier optional parameters are missing, cannot place the block parameter
        None => Normalized {
            request,
            block: BlockParam::Unknown,
        },
    }
}

/// Rewrites symbolic block parameters to concrete block numbers
#[derive(Debug)]
pub struct BlockRefMiddleware {
    methods: Arc<MethodTable>,
    tracker: BlockTracker,
}

impl BlockRefMiddleware {
    /// Create the stage
    pub fn new(methods: Arc<MethodTable>, tracker: BlockTracker) -> Self {
        Self { methods, tracker }
    }
}

#[async_trait::async_trait]
impl Middleware for BlockRefMiddleware {
    async fn handle(&self, request: RpcRequest, next: Next) -> RpcResult {
        let spec = self.methods.get(&request.method);
        if spec.block_param.is_none() {
            return next.run(request).await;
        }
        let normalized = normalize(request, spec, &self.tracker).await;
        next.run(normalized.request).await
    }

    fn name(&self) -> &'static str {
        "block-ref"
    }
}
