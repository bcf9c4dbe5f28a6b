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

use std::task::{Context, Poll};

use chainrelay_types::{ErrorObject, Id, RpcError, RpcRequest, RpcResult};
use futures_util::{future::BoxFuture, FutureExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tower::Service;
use tracing::trace;
use url::Url;

/// Sends one JSON-RPC 2.0 request per HTTP POST.
///
/// Non-2xx statuses become [`RpcError::Http`], error objects become [`RpcError::ErrorResp`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    /// Create a transport posting to `url`
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: &'a Id,
    method: &'a str,
    params: &'a [Value],
}

impl Service<RpcRequest> for HttpTransport {
    type Response = Value;
    type Error = RpcError;
    type Future = BoxFuture<'static, RpcResult>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // reqwest pools connections internally, always ready
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RpcRequest) -> Self::Future {
        let client = self.client.clone();
        let url = self.url.clone();
        async move {
            let body = WireRequest {
                jsonrpc: "2.0",
                id: &request.id,
                method: &request.method,
                params: &request.params,
            };
            trace!(method = %request.method, "sending request");
            let response = client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(|e| RpcError::Transport(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| RpcError::Transport(e.to_string()))?;
            if !status.is_success() {
                return Err(RpcError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }
            parse_response(&text)
        }
        .boxed()
    }
}

/// Parse a single JSON-RPC response body. A `"result": null` is a successful null.
pub(crate) fn parse_response(body: &str) -> RpcResult {
    let mut response: Map<String, Value> =
        serde_json::from_str(body).map_err(|e| RpcError::Deserialization(e.to_string()))?;

    if let Some(error) = response.remove("error").filter(|e| !e.is_null()) {
        let error: ErrorObject = serde_json::from_value(error)
            .map_err(|e| RpcError::Deserialization(format!("invalid error object: {e}")))?;
        return Err(RpcError::ErrorResp(error));
    }

    response
        .remove("result")
        .ok_or_else(|| RpcError::Deserialization("response has neither result nor error".into()))
}
