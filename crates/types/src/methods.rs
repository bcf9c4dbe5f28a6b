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

//! Classification of JSON-RPC methods.
//!
//! Which methods are cacheable, which carry a block parameter, and which should be retried
//! when they come back empty is data, not logic. The builtin table is loaded from
//! `data/methods.json` and can be replaced wholesale or extended per method.

use std::{collections::HashMap, sync::LazyLock};

use serde::{Deserialize, Serialize};

const BUILTIN_METHODS: &str = include_str!("../data/methods.json");

// parsed once, the embedded table is checked by `test_builtin_table`
static BUILTIN: LazyLock<MethodTable> = LazyLock::new(|| {
    MethodTable::from_json(BUILTIN_METHODS).expect("builtin method table should parse")
});

/// How responses to a method may be cached
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheStrategy {
    /// Result never changes for the same parameters, e.g. a block by hash
    Permanent,
    /// Result is fixed once the block parameter is resolved to a concrete block
    Block,
    /// Result is only valid for the current head, e.g. the block number itself
    Head,
    /// Never cached or deduplicated
    #[default]
    Never,
}

/// Classification of a single method
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MethodSpec {
    /// Caching strategy
    pub cache: CacheStrategy,
    /// Index of the block parameter, if the method takes one
    pub block_param: Option<usize>,
    /// Retry when the result is empty, the node may not have indexed the block yet
    pub retry_on_empty: bool,
    /// Only cache results with a non-null `blockHash`, i.e. mined transactions
    pub require_block_hash: bool,
}

const UNCLASSIFIED: MethodSpec = MethodSpec {
    cache: CacheStrategy::Never,
    block_param: None,
    retry_on_empty: false,
    require_block_hash: false,
};

/// Method name to classification. Unknown methods are treated as never cacheable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MethodTable {
    methods: HashMap<String, MethodSpec>,
}

impl MethodTable {
    /// The builtin classification table
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Parse a table from its JSON form: an object keyed by method name
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Look up a method. Unknown methods get the never-cached classification.
    pub fn get(&self, method: &str) -> &MethodSpec {
        self.methods.get(method).unwrap_or(&UNCLASSIFIED)
    }

    /// Add or replace a method's classification
    pub fn insert(&mut self, method: impl Into<String>, spec: MethodSpec) {
        self.methods.insert(method.into(), spec);
    }

    /// Overlay another table on this one, entries in `other` win
    pub fn extend(&mut self, other: Self) {
        self.methods.extend(other.methods);
    }

    /// Number of classified methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if no method is classified
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
