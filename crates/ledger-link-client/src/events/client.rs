/*
[INPUT]:  Connection lifecycle transitions and routed inbound frames
[OUTPUT]: ClientEvent values delivered to collaborators
[POS]:    Event layer - client-level notification vocabulary
[UPDATE]: When the worker starts publishing a new kind of notification
*/

use serde_json::Value;

use super::publisher::Event;
use crate::types::{ServerInfo, TransactionResult};

/// Notifications published by the client worker
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    Subscribed(ServerInfo),
    LedgerClosed(ServerInfo),
    /// Every inbound frame, before type routing
    Message(Value),
    /// Every outbound frame, before it is written
    SendMessage(Value),
    ValidatedTransaction(TransactionResult),
    TransactionMessage(Value),
    TableMessage(Value),
    PathFind(Value),
    /// Published after each processed inbound frame
    StateChange,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    Subscribed,
    LedgerClosed,
    Message,
    SendMessage,
    ValidatedTransaction,
    TransactionMessage,
    TableMessage,
    PathFind,
    StateChange,
    Error,
}

impl Event for ClientEvent {
    type Kind = ClientEventKind;

    fn kind(&self) -> ClientEventKind {
        match self {
            ClientEvent::Connected => ClientEventKind::Connected,
            ClientEvent::Disconnected => ClientEventKind::Disconnected,
            ClientEvent::Reconnecting => ClientEventKind::Reconnecting,
            ClientEvent::Reconnected => ClientEventKind::Reconnected,
            ClientEvent::Subscribed(_) => ClientEventKind::Subscribed,
            ClientEvent::LedgerClosed(_) => ClientEventKind::LedgerClosed,
            ClientEvent::Message(_) => ClientEventKind::Message,
            ClientEvent::SendMessage(_) => ClientEventKind::SendMessage,
            ClientEvent::ValidatedTransaction(_) => ClientEventKind::ValidatedTransaction,
            ClientEvent::TransactionMessage(_) => ClientEventKind::TransactionMessage,
            ClientEvent::TableMessage(_) => ClientEventKind::TableMessage,
            ClientEvent::PathFind(_) => ClientEventKind::PathFind,
            ClientEvent::StateChange => ClientEventKind::StateChange,
            ClientEvent::Error(_) => ClientEventKind::Error,
        }
    }
}
