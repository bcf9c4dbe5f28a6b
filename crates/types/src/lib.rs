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

//! Chainrelay common types

mod block;
pub use block::{block_number_param, BlockHead, BlockRef, HeadChange};

mod methods;
pub use methods::{CacheStrategy, MethodSpec, MethodTable};

mod network;
pub use network::NetworkSpec;

mod rpc;
pub use rpc::{ErrorObject, RpcError, RpcRequest, RpcResponse, RpcResult};

// callers should not need a direct alloy dependency
pub use alloy_eips::BlockNumberOrTag;
pub use alloy_json_rpc::Id;
pub use alloy_primitives::B256;
