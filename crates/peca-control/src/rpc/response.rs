//! JSON-RPC 2.0 response envelope and error translation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RpcConfig;
use crate::{ControlError, Result};

/// Error object carried by a failed response. Every field is optional on the
/// wire; missing ones fall back to `"rpc error"`, `-1` and `0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl From<RpcErrorObject> for ControlError {
    fn from(err: RpcErrorObject) -> Self {
        ControlError::RpcProtocol {
            code: err.code.unwrap_or(RpcConfig::DEFAULT_ERROR_CODE),
            id: err.id.unwrap_or(0),
            message: err
                .message
                .unwrap_or_else(|| RpcConfig::DEFAULT_ERROR_MESSAGE.to_string()),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    #[serde(default)]
    pub id: Option<Value>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> RpcResponse<T> {
    pub fn success(id: Option<Value>, result: T) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcErrorObject {
                message: Some(message.into()),
                code: Some(code),
                id: None,
            }),
            id,
        }
    }

    /// The error, if present, wins over any result.
    pub fn into_result(self) -> Result<T> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        self.result
            .ok_or_else(|| ControlError::decode("response carries neither result nor error"))
    }

    /// Like [`into_result`](Self::into_result) but a missing result is fine.
    pub fn check_error(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
