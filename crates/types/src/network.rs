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

//! Network specification

use serde::{Deserialize, Serialize};
use url::Url;

/// The remote network a client talks to
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkSpec {
    /// Symbolic network name, e.g. "mainnet", used for logging
    pub name: String,
    /// Chain id
    pub chain_id: u64,
    /// JSON-RPC endpoint
    pub rpc_url: Url,
}

impl NetworkSpec {
    /// Chain id in canonical hex form, as returned by `eth_chainId`
    pub fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_hex() {
        let spec = NetworkSpec {
            name: "goerli".to_string(),
            chain_id: 5,
            rpc_url: Url::parse("https://goerli.infura.io/v3/abc").unwrap(),
        };
        assert_eq!(spec.chain_id_hex(), "0x5");

        let spec = NetworkSpec {
            chain_id: 11155111,
            ..spec
        };
        assert_eq!(spec.chain_id_hex(), "0xaa36a7");
    }
}
