//! JSON-RPC 2.0 request envelope and id allocation.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RpcConfig;
use crate::{ControlError, Result};

/// Positional or named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Params {
    /// A single positional argument, encoded as a one-element array.
    pub fn single(value: impl Into<Value>) -> Self {
        Params::Array(vec![value.into()])
    }

    /// Named parameters from any serializable struct or map.
    pub fn named<T: Serialize>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Params::Object(map)),
            other => Err(ControlError::Config {
                message: format!("named params must be an object, got {}", other),
            }),
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Array(values)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Object(map)
    }
}

impl From<Params> for Value {
    fn from(params: Params) -> Self {
        match params {
            Params::Array(values) => Value::Array(values),
            Params::Object(map) => Value::Object(map),
        }
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    /// Omitted from the wire entirely when there are no parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    pub id: i64,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Params>, id: i64) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Monotonic request-id counter, one per connection.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicI64,
}

impl RequestIds {
    pub fn starting_at(seed: i64) -> Self {
        Self {
            next: AtomicI64::new(seed),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::starting_at(RpcConfig::REQUEST_ID_SEED)
    }
}
