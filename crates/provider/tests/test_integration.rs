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

use chainrelay_provider::{
    test_utils::{fake_block, FakeProvider},
    ClientConfig, ErrorObject, Id, NetworkClient, NetworkSpec, RpcError, RpcRequest,
};
use futures_util::future::join;
use serde_json::{json, Value};
use tokio::time::Instant;
use url::Url;

const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

fn setup() -> (Arc<FakeProvider>, NetworkClient) {
    let provider = Arc::new(FakeProvider::default());
    let mut config = ClientConfig::new(NetworkSpec {
        name: "mainnet".to_string(),
        chain_id: 1,
        rpc_url: Url::parse("https://mainnet.infura.io/v3/test").unwrap(),
    });
    config.settings.tracker.backoff.max_jitter = Duration::ZERO;
    let client = NetworkClient::with_provider(config, provider.clone());
    (provider, client)
}

fn request(id: u64, method: &str, params: Vec<Value>) -> RpcRequest {
    RpcRequest::new(Id::Number(id), method, params)
}

fn tx_hash() -> String {
    format!("0x{}", "ab".repeat(32))
}

#[tokio::test(start_paused = true)]
async fn latest_read_is_pinned_and_cached() {
    let (provider, client) = setup();
    provider.set_head(100);
    provider.set_response("eth_getBalance", json!("0xde0b6b3a7640000"));

    let balance = || request(1, "eth_getBalance", vec![json!(ADDRESS), json!("latest")]);
    let first = client.dispatch(balance()).await;
    let second = client.dispatch(balance()).await;

    assert_eq!(first.result, Some(json!("0xde0b6b3a7640000")));
    assert_eq!(first, second);
    assert_eq!(provider.calls("eth_getBalance"), 1);
    assert_eq!(
        provider.requests()[0].params,
        vec![json!(ADDRESS), json!("0x64")]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_reads_share_one_call() {
    let (provider, client) = setup();
    provider.set_head(101);
    provider.set_latency(Duration::from_millis(250));
    provider.set_response("eth_getBlockByNumber", fake_block(101));

    let by_number = |id| request(id, "eth_getBlockByNumber", vec![json!("0x65"), json!(false)]);
    let (a, b) = join(client.dispatch(by_number(1)), client.dispatch(by_number(2))).await;

    assert_eq!(provider.calls("eth_getBlockByNumber"), 1);
    assert_eq!(a.id, Id::Number(1));
    assert_eq!(b.id, Id::Number(2));
    assert_eq!(a.result, Some(fake_block(101)));
    assert_eq!(a.result, b.result);
}

#[tokio::test(start_paused = true)]
async fn empty_result_retried_after_head_advances() {
    let (provider, client) = setup();
    provider.set_head(100);
    client.block_tracker().get_latest_block().await.unwrap();

    let transaction = json!({ "hash": tx_hash(), "blockNumber": "0x65", "blockHash": null });
    provider.push_response("eth_getTransactionByHash", Ok(Value::Null));
    provider.set_response("eth_getTransactionByHash", transaction.clone());
    provider.set_latency(Duration::from_secs(1));
    provider.set_head(101);

    // the tracker observes 101 while the first lookup is in flight
    let (head, result) = join(client.block_tracker().check_for_latest_block(), async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        client
            .request("eth_getTransactionByHash", vec![json!(tx_hash())])
            .await
    })
    .await;

    assert_eq!(head.unwrap().number, 101);
    assert_eq!(result, Ok(transaction));
    assert_eq!(provider.calls("eth_getTransactionByHash"), 2);
    assert_eq!(client.block_tracker().get_current_block().unwrap().number, 101);
}

#[tokio::test(start_paused = true)]
async fn pending_receipt_is_not_retried_on_static_head() {
    let (provider, client) = setup();
    provider.set_head(100);
    client.block_tracker().get_latest_block().await.unwrap();
    provider.set_response("eth_getTransactionReceipt", Value::Null);

    let start = Instant::now();
    for _ in 0..2 {
        let result = client
            .request("eth_getTransactionReceipt", vec![json!(tx_hash())])
            .await;
        assert_eq!(result, Ok(Value::Null));
    }

    assert_eq!(provider.calls("eth_getTransactionReceipt"), 2);
    assert_eq!(provider.head_polls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn protocol_error_passes_through_uncached() {
    let (provider, client) = setup();
    provider.set_head(100);
    let error = ErrorObject::new(-32000, "header not found");
    provider.set_error("eth_getBalance", RpcError::ErrorResp(error.clone()));

    for id in 0..2 {
        let response = client
            .dispatch(request(id, "eth_getBalance", vec![json!(ADDRESS), json!("0x64")]))
            .await;
        assert_eq!(response.id, Id::Number(id));
        assert_eq!(response.result, None);
        assert_eq!(response.error, Some(error.clone()));
    }
    assert_eq!(provider.calls("eth_getBalance"), 2);
}

#[tokio::test(start_paused = true)]
async fn tracker_recovers_from_failed_polls() {
    let (provider, client) = setup();
    let transport_error = || RpcError::Transport("connection refused".to_string());
    provider.push_head_error(transport_error());
    provider.push_head_error(transport_error());
    provider.set_head(101);

    let start = Instant::now();
    let mut subscription = client.block_tracker().subscribe();
    let change = subscription.recv().await.unwrap();

    assert_eq!(change.previous, None);
    assert_eq!(change.current.number, 101);
    assert_eq!(provider.head_polls(), 3);
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert!(subscription.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn cached_replay_is_identical() {
    let (provider, client) = setup();
    provider.set_head(100);
    provider.set_response(
        "eth_call",
        json!("0x0000000000000000000000000000000000000000000000000000000000000001"),
    );

    let call = || {
        request(
            9,
            "eth_call",
            vec![json!({ "to": ADDRESS, "data": "0x18160ddd" }), json!("latest")],
        )
    };
    let first = serde_json::to_string(&client.dispatch(call()).await).unwrap();
    for _ in 0..5 {
        let replay = serde_json::to_string(&client.dispatch(call()).await).unwrap();
        assert_eq!(replay, first);
    }
    assert_eq!(provider.calls("eth_call"), 1);
}

#[tokio::test(start_paused = true)]
async fn head_failure_does_not_fail_requests() {
    let (provider, client) = setup();
    provider.set_response("eth_chainId", json!("0x1"));
    provider.set_response("eth_getBalance", json!("0x0"));

    assert_eq!(client.request("eth_chainId", vec![]).await, Ok(json!("0x1")));

    // no head scripted: normalization cannot pin "latest" and forwards it as is
    let result = client
        .request("eth_getBalance", vec![json!(ADDRESS), json!("latest")])
        .await;
    assert_eq!(result, Ok(json!("0x0")));
    assert_eq!(
        provider.requests().last().unwrap().params,
        vec![json!(ADDRESS), json!("latest")]
    );
}
