/*
[INPUT]:  Subscription targets and push-notification payloads
[OUTPUT]: Account ids, book descriptors, ServerInfo and TransactionResult
[POS]:    Data layer - opaque domain payload wrappers
[UPDATE]: When push notifications gain fields the engine reads
*/

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Seconds between the Unix epoch and the ledger epoch (2000-01-01T00:00:00Z)
const LEDGER_EPOCH_OFFSET: i64 = 946_684_800;

/// Base58 account address, kept opaque
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Currency plus optional issuer; native currency has no issuer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Issue {
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<AccountId>,
}

impl Issue {
    pub fn native(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            issuer: None,
        }
    }

    pub fn issued(currency: impl Into<String>, issuer: AccountId) -> Self {
        Self {
            currency: currency.into(),
            issuer: Some(issuer),
        }
    }

    pub fn to_json(&self) -> Value {
        match &self.issuer {
            Some(issuer) => json!({ "currency": self.currency, "issuer": issuer }),
            None => json!({ "currency": self.currency }),
        }
    }
}

/// Order-book subscription descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookSubscription {
    pub taker_gets: Issue,
    pub taker_pays: Issue,
    #[serde(default = "default_snapshot")]
    pub snapshot: bool,
    #[serde(default)]
    pub both: bool,
}

fn default_snapshot() -> bool {
    true
}

impl BookSubscription {
    pub fn new(taker_gets: Issue, taker_pays: Issue) -> Self {
        Self {
            taker_gets,
            taker_pays,
            snapshot: true,
            both: false,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut book = json!({
            "snapshot": self.snapshot,
            "taker_gets": self.taker_gets.to_json(),
            "taker_pays": self.taker_pays.to_json(),
        });
        if self.both {
            book["both"] = Value::Bool(true);
        }
        book
    }
}

/// Which ledger a read should run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerIndex {
    #[default]
    Validated,
    Current,
    Closed,
    Sequence(u64),
}

impl LedgerIndex {
    pub fn to_json(self) -> Value {
        match self {
            LedgerIndex::Validated => Value::from("validated"),
            LedgerIndex::Current => Value::from("current"),
            LedgerIndex::Closed => Value::from("closed"),
            LedgerIndex::Sequence(sequence) => Value::from(sequence),
        }
    }
}

/// Latest node status assembled from serverStatus / ledgerClosed frames
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    pub ledger_index: Option<u64>,
    pub ledger_hash: Option<String>,
    /// Seconds since the ledger epoch
    pub ledger_time: Option<u64>,
    pub fee_base: Option<u64>,
    pub fee_ref: Option<u64>,
    pub reserve_base: Option<u64>,
    pub reserve_inc: Option<u64>,
    pub load_base: Option<u64>,
    pub load_factor: Option<u64>,
    pub server_status: Option<String>,
    pub validated_ledgers: Option<String>,
    pub txn_count: Option<u64>,
    pub updated: bool,
}

impl ServerInfo {
    /// Merge any known fields present in `message`; absent fields keep their value.
    pub fn update(&mut self, message: &Map<String, Value>) {
        let uint = |key: &str| message.get(key).and_then(Value::as_u64);
        let text = |key: &str| message.get(key).and_then(Value::as_str).map(str::to_string);

        macro_rules! merge {
            ($field:ident, $reader:expr) => {
                if let Some(value) = $reader(stringify!($field)) {
                    self.$field = Some(value);
                }
            };
        }

        merge!(ledger_index, uint);
        merge!(ledger_hash, text);
        merge!(ledger_time, uint);
        merge!(fee_base, uint);
        merge!(fee_ref, uint);
        merge!(reserve_base, uint);
        merge!(reserve_inc, uint);
        merge!(load_base, uint);
        merge!(load_factor, uint);
        merge!(server_status, text);
        merge!(validated_ledgers, text);
        merge!(txn_count, uint);
        self.updated = true;
    }

    pub fn ledger_close_time(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::try_from(self.ledger_time?).ok()?;
        Utc.timestamp_opt(seconds + LEDGER_EPOCH_OFFSET, 0).single()
    }
}

/// A transaction notification from the `transactions` / account streams
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionResult {
    pub hash: Option<String>,
    pub ledger_index: Option<u64>,
    pub validated: bool,
    pub engine_result: Option<String>,
    pub initiating_account: Option<AccountId>,
    pub transaction: Value,
    pub meta: Option<Value>,
}

impl TransactionResult {
    pub fn from_notification(message: &Value) -> Self {
        let transaction = message.get("transaction").cloned().unwrap_or(Value::Null);
        let hash = transaction
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string);
        let initiating_account = transaction
            .get("Account")
            .and_then(Value::as_str)
            .map(AccountId::new);

        Self {
            hash,
            ledger_index: message.get("ledger_index").and_then(Value::as_u64),
            validated: message
                .get("validated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            engine_result: message
                .get("engine_result")
                .and_then(Value::as_str)
                .map(str::to_string),
            initiating_account,
            meta: message.get("meta").cloned(),
            transaction,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_server_info_update_merges_fields() {
        let mut info = ServerInfo::default();
        let closed = json!({
            "type": "ledgerClosed",
            "ledger_index": 120,
            "ledger_hash": "ABCD",
            "ledger_time": 0,
            "fee_base": 10,
            "txn_count": 3
        });
        info.update(closed.as_object().unwrap());

        let status = json!({ "type": "serverStatus", "load_factor": 256, "server_status": "full" });
        info.update(status.as_object().unwrap());

        assert_eq!(info.ledger_index, Some(120));
        assert_eq!(info.ledger_hash.as_deref(), Some("ABCD"));
        assert_eq!(info.load_factor, Some(256));
        assert_eq!(info.server_status.as_deref(), Some("full"));
        assert!(info.updated);
        assert_eq!(
            info.ledger_close_time().unwrap().to_rfc3339(),
            "2000-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_transaction_result_from_notification() {
        let notification = json!({
            "type": "transaction",
            "validated": true,
            "ledger_index": 77,
            "engine_result": "tesSUCCESS",
            "transaction": { "hash": "FEED", "Account": "zAlice" },
            "meta": { "TransactionResult": "tesSUCCESS" }
        });

        let result = TransactionResult::from_notification(&notification);
        assert!(result.validated);
        assert_eq!(result.hash.as_deref(), Some("FEED"));
        assert_eq!(result.initiating_account, Some(AccountId::new("zAlice")));
        assert_eq!(result.ledger_index, Some(77));
        assert!(result.meta.is_some());
    }

    #[test]
    fn test_ledger_index_json() {
        assert_eq!(LedgerIndex::default().to_json(), json!("validated"));
        assert_eq!(LedgerIndex::Sequence(42).to_json(), json!(42));
    }

    #[test]
    fn test_book_subscription_json() {
        let book = BookSubscription::new(
            Issue::native("ZXC"),
            Issue::issued("USD", AccountId::new("zIssuer")),
        );
        assert_eq!(
            book.to_json(),
            json!({
                "snapshot": true,
                "taker_gets": { "currency": "ZXC" },
                "taker_pays": { "currency": "USD", "issuer": "zIssuer" }
            })
        );
    }
}
