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

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Chainrelay provider
//!
//! A JSON-RPC client for a hosted Ethereum endpoint: a polling block tracker plus a fixed
//! pipeline of caching, deduplicating and retrying middleware in front of the endpoint.

mod client;
pub use client::{
    create_network_client, CacheSettings, ClientConfig, NetworkClient, RetrySettings, Settings,
};

pub mod middleware;
pub use middleware::{Middleware, Next, Pipeline, PipelineBuilder};

mod tracker;
pub use tracker::{BlockTracker, HeadSubscription, TrackerSettings};

mod traits;
#[cfg(any(test, feature = "test-utils"))]
pub use traits::MockRemoteProvider;
pub use traits::{Platform, RemoteProvider, TokioPlatform};

mod transport;
pub use transport::{new_http_provider, HttpProvider, HttpTransport, TowerProvider};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// re-export the types every caller needs
pub use chainrelay_types::{
    BlockHead, ErrorObject, HeadChange, Id, MethodTable, NetworkSpec, RpcError, RpcRequest,
    RpcResponse, RpcResult,
};
