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

use chainrelay_types::{RpcRequest, RpcResult};
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Executes a single JSON-RPC request against the remote endpoint.
///
/// This is the terminal step of the pipeline and the source of the block tracker's polls.
/// Implementations surface protocol errors as [`chainrelay_types::RpcError::ErrorResp`] and
/// never retry.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait::async_trait]
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait RemoteProvider: Send + Sync {
    /// Send the request and return its result or error
    async fn request(&self, request: RpcRequest) -> RpcResult;
}
