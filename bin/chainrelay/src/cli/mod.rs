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

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chainrelay_provider::{
    create_network_client, CacheSettings, ClientConfig, Id, MethodTable, NetworkClient,
    NetworkSpec, RetrySettings, RpcRequest, Settings, TrackerSettings,
};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use url::Url;

mod json;
mod network_spec;
mod tracing;

use json::get_json_config;

/// Main entry point for the CLI
///
/// Parses the CLI arguments, assembles the network client and runs the subcommand.
pub async fn run() -> anyhow::Result<()> {
    let opt = Cli::parse();
    let _guard = tracing::configure_logging(&opt.logs)?;

    let network = network_spec::resolve_network_spec(
        &opt.common.network,
        opt.common.network_spec.as_deref(),
        opt.common.infura_project_id.as_deref(),
        opt.common.rpc_url.as_ref(),
    )?;
    tracing::info!(
        network = %network.name,
        chain_id = %network.chain_id_hex(),
        "resolved network"
    );

    let config = opt.common.client_config(network)?;
    tracing::debug!("Client settings: {:#?}", config.settings);
    let client = create_network_client(config)?;

    match opt.command {
        Command::Request(args) => request(&client, args).await,
        Command::Watch(args) => watch(&client, args).await,
    }
}

async fn request(client: &NetworkClient, args: RequestArgs) -> anyhow::Result<()> {
    let params: Vec<Value> = match &args.params {
        Some(params) => serde_json::from_str(params).context("params should be a JSON array")?,
        None => vec![],
    };
    let response = client
        .dispatch(RpcRequest::new(Id::Number(1), args.method, params))
        .await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn watch(client: &NetworkClient, args: WatchArgs) -> anyhow::Result<()> {
    let mut subscription = client.block_tracker().subscribe();
    let mut seen = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, shutting down");
                return Ok(());
            }
            change = subscription.recv() => {
                let Some(change) = change else {
                    return Ok(());
                };
                println!("{} {}", change.current.number, change.current.hash);
                seen += 1;
                if args.count.is_some_and(|count| seen >= count) {
                    return Ok(());
                }
            }
        }
    }
}

/// CLI options
#[derive(Debug, Parser)]
#[command(name = "chainrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    logs: LogsArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one JSON-RPC request through the pipeline and print the response
    #[command(name = "request")]
    Request(RequestArgs),

    /// Print each new chain head as the block tracker observes it
    #[command(name = "watch")]
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// Method name, e.g. eth_getBalance
    method: String,

    /// Parameters as a JSON array, e.g. '["0xabc...", "latest"]'
    params: Option<String>,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// Exit after this many head changes
    #[arg(long = "count", name = "count")]
    count: Option<usize>,
}

/// Common CLI options
#[derive(Debug, Args)]
#[command(next_help_heading = "Common")]
pub struct CommonArgs {
    /// Network to connect to
    #[arg(
        long = "network",
        name = "network",
        env = "NETWORK",
        default_value = "mainnet",
        global = true
    )]
    network: String,

    /// Network spec file, layered over the hardcoded spec
    #[arg(
        long = "network_spec",
        name = "network_spec",
        env = "NETWORK_SPEC",
        global = true
    )]
    network_spec: Option<String>,

    /// Infura project id, filled into the network's endpoint
    #[arg(
        long = "infura_project_id",
        name = "infura_project_id",
        env = "INFURA_PROJECT_ID",
        global = true,
        hide_env_values = true
    )]
    infura_project_id: Option<String>,

    /// JSON-RPC endpoint, replaces the network's endpoint
    #[arg(long = "rpc_url", name = "rpc_url", env = "RPC_URL", global = true)]
    rpc_url: Option<Url>,

    /// Method classification file (JSON), replaces the builtin table
    #[arg(
        long = "method_table",
        name = "method_table",
        env = "METHOD_TABLE",
        global = true
    )]
    method_table: Option<String>,

    /// Interval between head polls
    #[arg(
        long = "tracker.poll_interval_millis",
        name = "tracker.poll_interval_millis",
        env = "TRACKER_POLL_INTERVAL_MILLIS",
        default_value = "20000",
        global = true
    )]
    poll_interval_millis: u64,

    /// How long a head is reused without polling when nothing is subscribed
    #[arg(
        long = "tracker.block_reset_millis",
        name = "tracker.block_reset_millis",
        env = "TRACKER_BLOCK_RESET_MILLIS",
        default_value = "20000",
        global = true
    )]
    block_reset_millis: u64,

    /// Maximum number of cached responses
    #[arg(
        long = "cache.capacity",
        name = "cache.capacity",
        env = "CACHE_CAPACITY",
        default_value = "10000",
        global = true
    )]
    cache_capacity: u32,

    /// Attempts for reads that come back empty, including the first
    #[arg(
        long = "retry.max_attempts",
        name = "retry.max_attempts",
        env = "RETRY_MAX_ATTEMPTS",
        default_value = "10",
        global = true
    )]
    retry_max_attempts: u32,

    /// Wait between attempts for reads that come back empty
    #[arg(
        long = "retry.interval_millis",
        name = "retry.interval_millis",
        env = "RETRY_INTERVAL_MILLIS",
        default_value = "1000",
        global = true
    )]
    retry_interval_millis: u64,

    /// Client-side timeout for each request to the endpoint
    #[arg(
        long = "request_timeout_millis",
        name = "request_timeout_millis",
        env = "REQUEST_TIMEOUT_MILLIS",
        default_value = "30000",
        global = true
    )]
    request_timeout_millis: u64,
}

impl CommonArgs {
    fn client_config(&self, network: NetworkSpec) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::new(network);
        if let Some(path) = &self.method_table {
            let methods: MethodTable = get_json_config(path)?;
            tracing::info!(path = %path, methods = methods.len(), "loaded method table");
            config.methods = Arc::new(methods);
        }

        let defaults = Settings::default();
        config.settings = Settings {
            tracker: TrackerSettings {
                poll_interval: Duration::from_millis(self.poll_interval_millis),
                block_reset_duration: Duration::from_millis(self.block_reset_millis),
                ..defaults.tracker
            },
            cache: CacheSettings {
                capacity: self.cache_capacity,
            },
            retry: RetrySettings {
                max_attempts: self.retry_max_attempts,
                interval: Duration::from_millis(self.retry_interval_millis),
            },
            request_timeout: Some(Duration::from_millis(self.request_timeout_millis)),
        };
        Ok(config)
    }
}

/// CLI options for logging
#[derive(Debug, Args)]
#[command(next_help_heading = "Logging")]
pub struct LogsArgs {
    /// Log file
    ///
    /// If not provided, logs will be written to stderr
    #[arg(
        long = "log.file",
        name = "log.file",
        env = "LOG_FILE",
        default_value = None,
        global = true
    )]
    file: Option<String>,

    /// Log JSON
    ///
    /// If set, logs will be written in JSON format
    #[arg(
        long = "log.json",
        name = "log.json",
        env = "LOG_JSON",
        required = false,
        num_args = 0,
        global = true
    )]
    json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let cli = Cli::try_parse_from([
            "chainrelay",
            "--network",
            "goerli",
            "--cache.capacity",
            "64",
            "request",
            "eth_getBalance",
            r#"["0x00000000000000000000000000000000000000aa", "latest"]"#,
        ])
        .unwrap();
        assert_eq!(cli.common.network, "goerli");
        let Command::Request(args) = cli.command else {
            panic!("expected request command");
        };
        assert_eq!(args.method, "eth_getBalance");

        let network = NetworkSpec {
            name: "goerli".to_string(),
            chain_id: 5,
            rpc_url: Url::parse("http://localhost:8545").unwrap(),
        };
        let config = cli.common.client_config(network).unwrap();
        assert_eq!(config.settings.cache.capacity, 64);
        assert_eq!(config.settings.retry.max_attempts, 10);
        assert_eq!(config.settings.tracker.poll_interval, Duration::from_secs(20));
    }

    #[test]
    fn test_parse_watch() {
        let cli = Cli::try_parse_from(["chainrelay", "watch", "--count", "3"]).unwrap();
        let Command::Watch(args) = cli.command else {
            panic!("expected watch command");
        };
        assert_eq!(args.count, Some(3));
    }
}
