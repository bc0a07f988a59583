/*
[INPUT]:  Raw inbound JSON frames
[OUTPUT]: MessageType discriminator used for routing
[POS]:    Data layer - inbound frame classification
[UPDATE]: When the node pushes a new frame type
*/

use serde_json::Value;

/// Value of the `type` field on inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ServerStatus,
    LedgerClosed,
    Response,
    Transaction,
    PathFind,
    SingleTransaction,
    Table,
    Unknown,
}

impl MessageType {
    pub fn parse(token: &str) -> Self {
        match token {
            "serverStatus" => MessageType::ServerStatus,
            "ledgerClosed" => MessageType::LedgerClosed,
            "response" => MessageType::Response,
            "transaction" => MessageType::Transaction,
            "path_find" => MessageType::PathFind,
            "singleTransaction" => MessageType::SingleTransaction,
            "table" => MessageType::Table,
            _ => MessageType::Unknown,
        }
    }

    pub fn of(message: &Value) -> Self {
        message
            .get("type")
            .and_then(Value::as_str)
            .map_or(MessageType::Unknown, Self::parse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::ServerStatus => "serverStatus",
            MessageType::LedgerClosed => "ledgerClosed",
            MessageType::Response => "response",
            MessageType::Transaction => "transaction",
            MessageType::PathFind => "path_find",
            MessageType::SingleTransaction => "singleTransaction",
            MessageType::Table => "table",
            MessageType::Unknown => "unknown",
        }
    }
}
