/*
[INPUT]:  Node RPC vocabulary
[OUTPUT]: Typed command verbs and subscription stream names
[POS]:    Data layer - outbound protocol identifiers
[UPDATE]: When the node adds commands or streams used by the client
*/

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol verb carried in the `command` field of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Subscribe,
    Unsubscribe,
    LedgerEntry,
    AccountInfo,
    AccountLines,
    AccountTx,
    BookOffers,
    Ledger,
    LedgerCurrent,
    LedgerClosed,
    Tx,
    TxCount,
    ServerInfo,
    Submit,
    Ping,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Subscribe => "subscribe",
            Command::Unsubscribe => "unsubscribe",
            Command::LedgerEntry => "ledger_entry",
            Command::AccountInfo => "account_info",
            Command::AccountLines => "account_lines",
            Command::AccountTx => "account_tx",
            Command::BookOffers => "book_offers",
            Command::Ledger => "ledger",
            Command::LedgerCurrent => "ledger_current",
            Command::LedgerClosed => "ledger_closed",
            Command::Tx => "tx",
            Command::TxCount => "tx_count",
            Command::ServerInfo => "server_info",
            Command::Submit => "submit",
            Command::Ping => "ping",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side push stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Ledger,
    Server,
    Transactions,
    TransactionsProposed,
    Validations,
    Manifests,
    PeerStatus,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Ledger => "ledger",
            Stream::Server => "server",
            Stream::Transactions => "transactions",
            Stream::TransactionsProposed => "transactions_proposed",
            Stream::Validations => "validations",
            Stream::Manifests => "manifests",
            Stream::PeerStatus => "peer_status",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
