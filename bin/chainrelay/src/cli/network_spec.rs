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

use anyhow::{bail, Context};
use chainrelay_types::NetworkSpec;
use config::{Config, Environment, File, FileFormat};
use paste::paste;
use serde::Deserialize;
use url::Url;

const PROJECT_ID_PLACEHOLDER: &str = "{project_id}";

/// A network spec before the endpoint template is filled in
#[derive(Debug, Deserialize)]
struct NetworkTemplate {
    name: String,
    chain_id: u64,
    rpc_url: String,
}

/// Resolve the network spec.
///
/// Sources, lowest precedence first: the hardcoded spec for `network`, the spec file,
/// `NETWORK_*` environment variables. An explicit `rpc_url` replaces the endpoint,
/// otherwise `{project_id}` in the endpoint template is filled from `project_id`.
pub fn resolve_network_spec(
    network: &str,
    file: Option<&str>,
    project_id: Option<&str>,
    rpc_url: Option<&Url>,
) -> anyhow::Result<NetworkSpec> {
    let network = network.to_lowercase();
    let hardcoded = get_hardcoded_network_spec(&network);
    if hardcoded.is_none() && file.is_none() {
        bail!(
            "unknown network {network}, expected one of {} or a network spec file",
            HARDCODED_NETWORK_SPECS.join(", ")
        );
    }

    let mut builder = Config::builder().set_default("name", network.as_str())?;
    if let Some(spec) = hardcoded {
        builder = builder.add_source(File::from_str(spec, FileFormat::Toml));
    }
    if let Some(file) = file {
        builder = builder.add_source(File::with_name(file));
    }
    let template: NetworkTemplate = builder
        .add_source(Environment::with_prefix("NETWORK"))
        .build()
        .context("should build network config")?
        .try_deserialize()
        .context("should deserialize network config")?;

    if template.chain_id == 0 {
        bail!("chain id must be non-zero");
    }

    let rpc_url = match rpc_url {
        Some(url) => url.clone(),
        None => fill_endpoint(&template.rpc_url, project_id)?,
    };

    Ok(NetworkSpec {
        name: template.name,
        chain_id: template.chain_id,
        rpc_url,
    })
}

fn fill_endpoint(template: &str, project_id: Option<&str>) -> anyhow::Result<Url> {
    let endpoint = if template.contains(PROJECT_ID_PLACEHOLDER) {
        let Some(project_id) = project_id else {
            bail!("endpoint {template} needs a project id, set INFURA_PROJECT_ID or RPC_URL");
        };
        template.replace(PROJECT_ID_PLACEHOLDER, project_id)
    } else {
        template.to_string()
    };
    Url::parse(&endpoint).with_context(|| format!("invalid endpoint url {endpoint}"))
}

macro_rules! define_hardcoded_network_specs {
    ($($network:ident),+) => {
        paste! {
            $(
                const [< $network:upper _SPEC >]: &str = include_str!(concat!("../../network_specs/", stringify!($network), ".toml"));
            )+

            fn get_hardcoded_network_spec(network: &str) -> Option<&'static str> {
                match network {
                    $(
                        stringify!($network) => Some([< $network:upper _SPEC >]),
                    )+
                    _ => None,
                }
            }

            pub const HARDCODED_NETWORK_SPECS: &[&str] = &[$(stringify!($network),)+];
        }
    };
}

define_hardcoded_network_specs!(mainnet, ropsten, rinkeby, kovan, goerli, sepolia);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardcoded_networks() {
        let expected = [
            ("mainnet", 1, "0x1"),
            ("ropsten", 3, "0x3"),
            ("rinkeby", 4, "0x4"),
            ("kovan", 42, "0x2a"),
            ("goerli", 5, "0x5"),
            ("sepolia", 11155111, "0xaa36a7"),
        ];
        for (network, chain_id, hex) in expected {
            let spec = resolve_network_spec(network, None, Some("abc123"), None).unwrap();
            assert_eq!(spec.name, network);
            assert_eq!(spec.chain_id, chain_id);
            assert_eq!(spec.chain_id_hex(), hex);
            assert_eq!(
                spec.rpc_url.as_str(),
                format!("https://{network}.infura.io/v3/abc123")
            );
        }
    }

    #[test]
    fn test_network_name_case_insensitive() {
        let spec = resolve_network_spec("Goerli", None, Some("abc"), None).unwrap();
        assert_eq!(spec.chain_id, 5);
    }

    #[test]
    fn test_missing_project_id() {
        assert!(resolve_network_spec("mainnet", None, None, None).is_err());
    }

    #[test]
    fn test_rpc_url_override() {
        let url = Url::parse("http://localhost:8545").unwrap();
        let spec = resolve_network_spec("mainnet", None, None, Some(&url)).unwrap();
        assert_eq!(spec.rpc_url, url);
        assert_eq!(spec.chain_id, 1);
    }

    #[test]
    fn test_unknown_network() {
        assert!(resolve_network_spec("localnet", None, None, None).is_err());
    }
}
