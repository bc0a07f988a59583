/*
[INPUT]:  Inbound `type: response` frames
[OUTPUT]: Response values with parsed status and RPC error kind
[POS]:    Data layer - correlated reply parsing
[UPDATE]: When the node adds error codes the retry policies care about
*/

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{ClientError, Result};
use crate::request::RequestId;

/// Error kind reported by the node in the `error` field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcError {
    EntryNotFound,
    ActNotFound,
    TxnNotFound,
    LgrNotFound,
    TooBusy,
    NoNetwork,
    NoCurrent,
    NoClosed,
    Internal,
    InvalidParams,
    UnknownCmd,
    SlowDown,
    NotReady,
    Other(String),
}

impl RpcError {
    pub fn parse(token: &str) -> Self {
        match token {
            "entryNotFound" => RpcError::EntryNotFound,
            "actNotFound" => RpcError::ActNotFound,
            "txnNotFound" => RpcError::TxnNotFound,
            "lgrNotFound" => RpcError::LgrNotFound,
            "tooBusy" => RpcError::TooBusy,
            "noNetwork" => RpcError::NoNetwork,
            "noCurrent" => RpcError::NoCurrent,
            "noClosed" => RpcError::NoClosed,
            "internal" => RpcError::Internal,
            "invalidParams" => RpcError::InvalidParams,
            "unknownCmd" => RpcError::UnknownCmd,
            "slowDown" => RpcError::SlowDown,
            "notReady" => RpcError::NotReady,
            other => RpcError::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RpcError::EntryNotFound => "entryNotFound",
            RpcError::ActNotFound => "actNotFound",
            RpcError::TxnNotFound => "txnNotFound",
            RpcError::LgrNotFound => "lgrNotFound",
            RpcError::TooBusy => "tooBusy",
            RpcError::NoNetwork => "noNetwork",
            RpcError::NoCurrent => "noCurrent",
            RpcError::NoClosed => "noClosed",
            RpcError::Internal => "internal",
            RpcError::InvalidParams => "invalidParams",
            RpcError::UnknownCmd => "unknownCmd",
            RpcError::SlowDown => "slowDown",
            RpcError::NotReady => "notReady",
            RpcError::Other(token) => token,
        }
    }

    /// Server-side conditions that usually clear on their own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::TooBusy
                | RpcError::NoNetwork
                | RpcError::NoCurrent
                | RpcError::NoClosed
                | RpcError::Internal
                | RpcError::SlowDown
                | RpcError::NotReady
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RpcError::EntryNotFound
                | RpcError::ActNotFound
                | RpcError::TxnNotFound
                | RpcError::LgrNotFound
        )
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply correlated to a request by its echoed `id`
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub succeeded: bool,
    /// `result` object; empty for error replies
    pub result: Map<String, Value>,
    pub error: Option<RpcError>,
    pub error_message: Option<String>,
    /// The raw frame
    pub message: Value,
}

impl Response {
    pub fn from_message(message: Value) -> Result<Self> {
        let id = message
            .get("id")
            .and_then(Value::as_u64)
            .map(RequestId::new)
            .ok_or_else(|| ClientError::InvalidResponse("response without numeric id".into()))?;

        let succeeded = message.get("status").and_then(Value::as_str) == Some("success");

        let result = match message.get("result") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let error = message
            .get("error")
            .and_then(Value::as_str)
            .map(RpcError::parse);

        let error_message = message
            .get("error_message")
            .or_else(|| message.get("error_exception"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            id,
            succeeded,
            result,
            error,
            error_message,
            message,
        })
    }

    /// Convert an error reply into a `ClientError::Rpc`
    pub fn to_error(&self) -> ClientError {
        let error = self
            .error
            .clone()
            .unwrap_or_else(|| RpcError::Other("unknown".to_string()));
        let message = self
            .error_message
            .clone()
            .unwrap_or_else(|| error.to_string());
        ClientError::Rpc { error, message }
    }

    pub fn result_value(&self) -> Value {
        Value::Object(self.result.clone())
    }
}
