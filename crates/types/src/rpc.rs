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

//! JSON-RPC request, response and error types

use std::fmt;

use alloy_json_rpc::Id;
use chainrelay_utils::json_rpc::{
    GATEWAY_TIMEOUT_MESSAGE, INTERNAL_ERROR_CODE, METHOD_NOT_FOUND_CODE,
    METHOD_NOT_FOUND_MESSAGE, RATE_LIMITED_MESSAGE,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of running a request through the pipeline
pub type RpcResult = Result<Value, RpcError>;

/// A JSON-RPC request as issued by a caller.
///
/// Stages never mutate a request in place, they derive a new one (see [`RpcRequest::with_param`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen request id, echoed back in the response
    pub id: Id,
    /// Method name, e.g. `eth_getBalance`
    pub method: String,
    /// Positional parameters
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// Create a new request
    pub fn new(id: Id, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Get the parameter at `index`, if present
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    /// Derive a request with the parameter at `index` replaced.
    ///
    /// If `index` is exactly one past the end the parameter is appended. Returns `None`
    /// if that would leave a gap in the parameter list.
    pub fn with_param(&self, index: usize, value: Value) -> Option<Self> {
        let mut params = self.params.clone();
        match index.cmp(&params.len()) {
            std::cmp::Ordering::Less => params[index] = value,
            std::cmp::Ordering::Equal => params.push(value),
            std::cmp::Ordering::Greater => return None,
        }
        Some(Self {
            id: self.id.clone(),
            method: self.method.clone(),
            params,
        })
    }
}

/// A JSON-RPC error object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Create an error object without data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC response as returned to a caller.
///
/// Exactly one of `result` and `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcResponse {
    /// Always "2.0"
    pub jsonrpc: &'static str,
    /// Id of the request this response answers
    pub id: Id,
    /// Successful result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl RpcResponse {
    /// Build the response for request `id` from a pipeline outcome
    pub fn from_result(id: Id, result: RpcResult) -> Self {
        match result {
            Ok(value) => Self {
                jsonrpc: "2.0",
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(err.to_error_object()),
            },
        }
    }

    /// Convert back into a result, losing the id
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Error taxonomy for requests passing through the pipeline.
///
/// `Clone` so that one upstream outcome can be handed to every deduplicated caller.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The endpoint answered with a JSON-RPC error object
    #[error("{0}")]
    ErrorResp(ErrorObject),
    /// The endpoint answered with a non-success HTTP status
    #[error("http error {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// The endpoint could not be reached
    #[error("transport error: {0}")]
    Transport(String),
    /// The request did not complete before the client-side timeout
    #[error("provider request timeout from client side")]
    Timeout,
    /// The response body was not a valid JSON-RPC response
    #[error("malformed response: {0}")]
    Deserialization(String),
    /// Failure inside the pipeline itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// True if this is an error object returned by the endpoint
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::ErrorResp(_))
    }

    /// Render this error as the JSON-RPC error object handed back to a caller.
    ///
    /// Protocol errors pass through unchanged.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::ErrorResp(err) => err.clone(),
            Self::Http { status: 405, .. } => {
                ErrorObject::new(METHOD_NOT_FOUND_CODE, METHOD_NOT_FOUND_MESSAGE)
            }
            Self::Http { status: 429, .. } => {
                ErrorObject::new(INTERNAL_ERROR_CODE, RATE_LIMITED_MESSAGE)
            }
            Self::Http {
                status: 503 | 504, ..
            } => ErrorObject::new(INTERNAL_ERROR_CODE, GATEWAY_TIMEOUT_MESSAGE),
            other => ErrorObject::new(INTERNAL_ERROR_CODE, other.to_string()),
        }
    }
}

impl From<ErrorObject> for RpcError {
    fn from(err: ErrorObject) -> Self {
        Self::ErrorResp(err)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_with_param_replaces_and_appends() {
        let req = RpcRequest::new(Id::Number(1), "eth_getBalance", vec![json!("0xabc")]);

        let appended = req.with_param(1, json!("0x64")).unwrap();
        assert_eq!(appended.params, vec![json!("0xabc"), json!("0x64")]);
        assert_eq!(req.params.len(), 1);

        let replaced = appended.with_param(1, json!("0x65")).unwrap();
        assert_eq!(replaced.params[1], json!("0x65"));
        assert_eq!(replaced.id, Id::Number(1));

        assert!(req.with_param(3, json!("0x1")).is_none());
    }

    #[test]
    fn test_protocol_error_passes_through() {
        let err = RpcError::ErrorResp(ErrorObject::new(-32000, "header not found"));
        assert!(err.is_protocol_error());
        assert_eq!(
            err.to_error_object(),
            ErrorObject::new(-32000, "header not found")
        );
    }

    #[test]
    fn test_http_status_mapping() {
        let not_allowed = RpcError::Http {
            status: 405,
            body: String::new(),
        };
        assert_eq!(not_allowed.to_error_object().code, METHOD_NOT_FOUND_CODE);

        let limited = RpcError::Http {
            status: 429,
            body: String::new(),
        };
        assert_eq!(limited.to_error_object().message, RATE_LIMITED_MESSAGE);

        let teapot = RpcError::Http {
            status: 418,
            body: "short and stout".to_string(),
        };
        let obj = teapot.to_error_object();
        assert_eq!(obj.code, INTERNAL_ERROR_CODE);
        assert!(obj.message.contains("418"));
    }

    #[test]
    fn test_response_serialization() {
        let ok = RpcResponse::from_result(Id::Number(7), Ok(Value::Null));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 7, "result": null})
        );

        let err = RpcResponse::from_result(Id::Number(8), Err(RpcError::Timeout));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["id"], json!(8));
        assert_eq!(value["error"]["code"], json!(INTERNAL_ERROR_CODE));
        assert!(value.get("result").is_none());
    }
}
