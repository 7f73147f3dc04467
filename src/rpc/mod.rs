//! JSON-RPC style request routing
//!
//! Responses always echo the request `id` (`null` when absent) and carry either
//! `result` or `error`, never both.

pub mod dispatcher;
pub mod params;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;

pub use dispatcher::{HandlerFuture, RpcDispatcher};
pub use params::Params;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const SERVER_ERROR: i32 = -32000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }
}

impl From<&Error> for RpcError {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidParams(_) => RpcError::new(INVALID_PARAMS, err.to_string()),
            _ => RpcError::new(SERVER_ERROR, err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: Value,
    pub outcome: std::result::Result<Value, RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    pub fn into_value(self) -> Value {
        match self.outcome {
            Ok(result) => json!({
                "jsonrpc": JSONRPC_VERSION,
                "result": result,
                "id": self.id,
            }),
            Err(error) => json!({
                "jsonrpc": JSONRPC_VERSION,
                "error": { "code": error.code, "message": error.message },
                "id": self.id,
            }),
        }
    }
}
