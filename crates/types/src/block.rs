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

//! Block heads and block references

use std::str::FromStr;

use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{B256, U64};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The chain head as last observed by a block tracker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHead {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
}

impl BlockHead {
    /// Extract the head from a JSON-RPC block object (`eth_getBlockByNumber` result).
    ///
    /// Returns `None` if the object lacks a number or hash, e.g. a pending block.
    pub fn from_rpc_block(block: &Value) -> Option<Self> {
        #[derive(Deserialize)]
        struct Fields {
            number: Option<U64>,
            hash: Option<B256>,
        }

        let fields = Fields::deserialize(block).ok()?;
        Some(Self {
            number: fields.number?.to::<u64>(),
            hash: fields.hash?,
        })
    }
}

/// Notification emitted by a block tracker when the head advances
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadChange {
    /// The previously emitted head, if any
    pub previous: Option<BlockHead>,
    /// The new head. Always higher than `previous`.
    pub current: BlockHead,
}

/// A block reference found in a request's block parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockRef {
    /// A block number or a symbolic tag
    Tag(BlockNumberOrTag),
    /// A block hash, either bare or in an EIP-1898 `{"blockHash": ...}` object
    Hash(B256),
}

impl BlockRef {
    /// Parse a block parameter. Returns `None` if the value is not a recognizable block reference.
    pub fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => {
                if s.len() == 66 && s.starts_with("0x") {
                    B256::from_str(s).ok().map(Self::Hash)
                } else {
                    BlockNumberOrTag::from_str(s).ok().map(Self::Tag)
                }
            }
            Value::Number(n) => n
                .as_u64()
                .map(|n| Self::Tag(BlockNumberOrTag::Number(n))),
            Value::Object(map) => {
                if let Some(hash) = map.get("blockHash") {
                    hash.as_str()
                        .and_then(|h| B256::from_str(h).ok())
                        .map(Self::Hash)
                } else {
                    map.get("blockNumber").and_then(Self::from_param)
                }
            }
            _ => None,
        }
    }

    /// The concrete block number, if this reference is one
    pub fn number(&self) -> Option<u64> {
        match self {
            Self::Tag(BlockNumberOrTag::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// True if this reference names one specific block forever: a number or a hash
    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Hash(_) | Self::Tag(BlockNumberOrTag::Number(_)))
    }
}

/// Canonical wire form of a block number parameter: lowercase hex, no leading zeros
pub fn block_number_param(number: u64) -> Value {
    Value::String(format!("0x{number:x}"))
}
