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

use std::{
    task::{Context, Poll},
    time::Instant,
};

use chainrelay_types::{RpcError, RpcRequest, RpcResult};
use futures_util::{future::BoxFuture, FutureExt};
use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;
use serde_json::Value;
use tower::{Layer, Service};

/// Per-method request metrics for the remote provider
#[derive(Default, Debug, Clone)]
pub(crate) struct MetricsLayer {}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        MetricsService { service }
    }
}

/// Records count, latency and outcome of each remote request
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    service: S,
}

#[derive(Metrics)]
#[metrics(scope = "remote_provider")]
struct MethodMetrics {
    #[metric(describe = "total count of requests.")]
    num_requests: Counter,

    #[metric(describe = "the number of opening requests.")]
    open_requests: Gauge,

    #[metric(describe = "the distribution of request latency.")]
    request_latency: Histogram,
}

#[derive(Metrics)]
#[metrics(scope = "remote_provider")]
struct MethodStatusMetrics {
    #[metric(describe = "the count of responses by outcome.")]
    response_status: Counter,
}

impl<S> Service<RpcRequest> for MetricsService<S>
where
    S: Service<RpcRequest, Response = Value, Error = RpcError> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Value;
    type Error = RpcError;
    type Future = BoxFuture<'static, RpcResult>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: RpcRequest) -> Self::Future {
        let method_name = request.method.clone();
        let metrics = MethodMetrics::new_with_labels(&[("method_name", method_name.clone())]);
        metrics.num_requests.increment(1);
        metrics.open_requests.increment(1);
        let start = Instant::now();

        // poll_ready was called on self.service, swap in the clone for the next caller
        let clone = self.service.clone();
        let mut svc = std::mem::replace(&mut self.service, clone);
        async move {
            let response = svc.call(request).await;
            metrics.open_requests.decrement(1);
            metrics
                .request_latency
                .record(start.elapsed().as_millis() as f64);
            MethodStatusMetrics::new_with_labels(&[
                ("method_name", method_name),
                ("status", outcome(&response).to_string()),
            ])
            .response_status
            .increment(1);
            response
        }
        .boxed()
    }
}

fn outcome(response: &RpcResult) -> &'static str {
    match response {
        Ok(_) => "success",
        Err(RpcError::ErrorResp(e)) => match e.code {
            -32700 => "parse_error",
            -32600 => "invalid_request",
            -32601 => "method_not_found",
            -32602 => "invalid_params",
            -32603 => "internal_error",
            x if (-32099..=-32000).contains(&x) => "server_error",
            _ => "other",
        },
        Err(RpcError::Http { status, .. }) if (400..500).contains(status) => "http_4xx",
        Err(RpcError::Http { .. }) => "http_5xx",
        Err(RpcError::Timeout) => "timeout",
        Err(RpcError::Transport(_)) => "transport",
        Err(RpcError::Deserialization(_)) => "malformed",
        Err(RpcError::Internal(_)) => "internal",
    }
}
