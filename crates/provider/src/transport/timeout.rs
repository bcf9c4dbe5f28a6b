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

//! Client-side request timeout.
//!
//! A request that does not complete within the configured duration fails with
//! [`RpcError::Timeout`] and the in-flight HTTP call is dropped.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use chainrelay_types::{RpcError, RpcRequest};
use pin_project::pin_project;
use tokio::time::Sleep;
use tower::{Layer, Service};

#[derive(Debug, Clone)]
pub(crate) struct ProviderTimeoutLayer {
    timeout: Duration,
}

impl ProviderTimeoutLayer {
    pub(crate) fn new(timeout: Duration) -> Self {
        ProviderTimeoutLayer { timeout }
    }
}

impl<S> Layer<S> for ProviderTimeoutLayer {
    type Service = ProviderTimeout<S>;

    fn layer(&self, service: S) -> Self::Service {
        ProviderTimeout {
            service,
            timeout: self.timeout,
        }
    }
}

/// Applies a timeout to each request sent through the inner service
#[derive(Debug, Clone)]
pub struct ProviderTimeout<S> {
    service: S,
    timeout: Duration,
}

impl<S> Service<RpcRequest> for ProviderTimeout<S>
where
    S: Service<RpcRequest, Error = RpcError>,
{
    type Response = S::Response;
    type Error = RpcError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: RpcRequest) -> Self::Future {
        ResponseFuture {
            response: self.service.call(request),
            sleep: tokio::time::sleep(self.timeout),
        }
    }
}

#[pin_project]
#[derive(Debug)]
pub struct ResponseFuture<F> {
    #[pin]
    response: F,
    #[pin]
    sleep: Sleep,
}

impl<F, T> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, RpcError>>,
{
    type Output = Result<T, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(v) = this.response.poll(cx) {
            return Poll::Ready(v);
        }
        match this.sleep.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(_) => Poll::Ready(Err(RpcError::Timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tower::{ServiceBuilder, ServiceExt};

    use super::*;
    use crate::Id;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let service = ServiceBuilder::new()
            .layer(ProviderTimeoutLayer::new(Duration::from_secs(5)))
            .service_fn(|_req: RpcRequest| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<Value, RpcError>(json!("0x1"))
            });

        let result = service
            .oneshot(RpcRequest::new(Id::Number(1), "eth_blockNumber", vec![]))
            .await;
        assert_eq!(result, Err(RpcError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_response_passes() {
        let service = ServiceBuilder::new()
            .layer(ProviderTimeoutLayer::new(Duration::from_secs(5)))
            .service_fn(|_req: RpcRequest| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<Value, RpcError>(json!("0x1"))
            });

        let result = service
            .oneshot(RpcRequest::new(Id::Number(1), "eth_blockNumber", vec![]))
            .await;
        assert_eq!(result, Ok(json!("0x1")));
    }
}
