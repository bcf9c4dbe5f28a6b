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

//! The remote provider: JSON-RPC over HTTP as a stack of tower services.

use std::time::Duration;

use anyhow::Context;
use chainrelay_types::{RpcError, RpcRequest, RpcResult};
use reqwest::Client;
use serde_json::Value;
use tower::{Service, ServiceBuilder, ServiceExt};
use url::Url;

use crate::RemoteProvider;

mod http;
pub use http::HttpTransport;
mod metrics;
use metrics::{MetricsLayer, MetricsService};
mod timeout;
use timeout::{ProviderTimeout, ProviderTimeoutLayer};

/// The remote provider built by [`new_http_provider`]
pub type HttpProvider = TowerProvider<MetricsService<ProviderTimeout<HttpTransport>>>;

/// Create a remote provider for the given endpoint, with a client-side request timeout
pub fn new_http_provider(rpc_url: &Url, request_timeout: Duration) -> anyhow::Result<HttpProvider> {
    let client = Client::builder()
        .build()
        .context("should build http client")?;
    let service = ServiceBuilder::new()
        .layer(MetricsLayer::default())
        .layer(ProviderTimeoutLayer::new(request_timeout))
        .service(HttpTransport::new(client, rpc_url.clone()));
    Ok(TowerProvider::new(service))
}

/// Adapts any tower service over [`RpcRequest`] into a [`RemoteProvider`]
#[derive(Clone, Debug)]
pub struct TowerProvider<S> {
    service: S,
}

impl<S> TowerProvider<S> {
    /// Wrap a service
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl<S> RemoteProvider for TowerProvider<S>
where
    S: Service<RpcRequest, Response = Value, Error = RpcError> + Clone + Send + Sync + 'static,
    S::Future: Send,
{
    async fn request(&self, request: RpcRequest) -> RpcResult {
        self.service.clone().oneshot(request).await
    }
}

#[cfg(test)]
mod tests {
    use chainrelay_types::{ErrorObject, Id};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_tower_provider_forwards_to_service() {
        let service = tower::service_fn(|request: RpcRequest| async move {
            match request.method.as_str() {
                "eth_chainId" => Ok(json!("0x1")),
                _ => Err(RpcError::ErrorResp(ErrorObject::new(-32601, "method not found"))),
            }
        });
        let provider = TowerProvider::new(service);

        let ok = provider
            .request(RpcRequest::new(Id::Number(1), "eth_chainId", vec![]))
            .await;
        assert_eq!(ok, Ok(json!("0x1")));

        let err = provider
            .request(RpcRequest::new(Id::Number(2), "eth_foo", vec![]))
            .await
            .unwrap_err();
        assert!(err.is_protocol_error());
    }
}
