/*
[INPUT]:  Accounts, ledger selectors, book sides, transaction hashes and blobs
[OUTPUT]: `result` objects of the corresponding node commands
[POS]:    Client layer - typed wrappers over common ledger commands
[UPDATE]: When adding convenience calls for more node commands
*/

use serde_json::Value;

use super::Client;
use crate::error::{ClientError, Result};
use crate::request::{ManagedRequest, Request, RetryPolicy};
use crate::types::{AccountId, Command, Issue, LedgerIndex, Response};

impl Client {
    async fn call(&self, request: Request) -> Result<Value> {
        self.request(request).await.map(|response| response.result_value())
    }

    pub async fn server_info(&self) -> Result<Value> {
        self.call(Request::new(Command::ServerInfo)).await
    }

    pub async fn ping(&self) -> Result<Value> {
        self.call(Request::new(Command::Ping)).await
    }

    pub async fn transaction_count(&self) -> Result<Value> {
        self.call(Request::new(Command::TxCount)).await
    }

    pub async fn account_info(&self, account: &AccountId) -> Result<Value> {
        let mut request = Request::new(Command::AccountInfo);
        request
            .json("account", account.as_str())
            .json("ledger_index", LedgerIndex::Validated.to_json())
            .json("strict", true);
        self.call(request).await
    }

    /// The account's root ledger entry; `None` when the account is unfunded.
    ///
    /// Retried on silence and transient failures until the retry depth is
    /// exhausted.
    pub async fn account_root(&self, account: &AccountId) -> Result<Option<Value>> {
        let address = account.as_str().to_string();
        let managed = ManagedRequest::new(Command::LedgerEntry)
            .before_send(move |request| {
                request
                    .json("account_root", address.as_str())
                    .json("ledger_index", LedgerIndex::Validated.to_json());
            })
            .retry_policy(RetryPolicy::UnlessNotFound)
            .decode(entry_node);

        match self.managed(managed).await {
            Ok(node) => Ok(Some(node)),
            Err(err) if err.is_rpc_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Raw ledger entry by index
    pub async fn ledger_entry(&self, index: &str, ledger: LedgerIndex) -> Result<Value> {
        let index = index.to_string();
        self.managed(single_attempt(Command::LedgerEntry, move |request| {
            request
                .json("index", index.as_str())
                .json("ledger_index", ledger.to_json());
        }))
        .await
    }

    pub async fn account_lines(&self, account: &AccountId) -> Result<Value> {
        let address = account.as_str().to_string();
        self.managed(single_attempt(Command::AccountLines, move |request| {
            request
                .json("account", address.as_str())
                .json("ledger_index", LedgerIndex::Validated.to_json());
        }))
        .await
    }

    pub async fn book_offers(
        &self,
        taker_gets: &Issue,
        taker_pays: &Issue,
        ledger: LedgerIndex,
    ) -> Result<Value> {
        let gets = taker_gets.to_json();
        let pays = taker_pays.to_json();
        self.managed(single_attempt(Command::BookOffers, move |request| {
            request
                .json("taker_gets", gets.clone())
                .json("taker_pays", pays.clone())
                .json("ledger_index", ledger.to_json());
        }))
        .await
    }

    pub async fn ledger(&self, ledger: LedgerIndex) -> Result<Value> {
        self.managed(single_attempt(Command::Ledger, move |request| {
            request
                .json("ledger_index", ledger.to_json())
                .json("transactions", false)
                .json("expand", false);
        }))
        .await
    }

    /// Sequence of the node's current open ledger
    pub async fn ledger_version(&self) -> Result<u64> {
        let managed = single_attempt(Command::LedgerCurrent, |_| {}).decode(|response| {
            response
                .result
                .get("ledger_current_index")
                .and_then(Value::as_u64)
                .ok_or_else(|| ClientError::Decode("missing ledger_current_index".into()))
        });
        self.managed(managed).await
    }

    /// Newest transactions of `account`, as the raw `account_tx` result
    pub async fn account_transactions(&self, account: &AccountId, limit: u32) -> Result<Value> {
        let address = account.as_str().to_string();
        self.managed(single_attempt(Command::AccountTx, move |request| {
            account_tx_params(request, &address, limit, None);
        }))
        .await
    }

    /// One page of `account`'s transactions.
    ///
    /// Pass the previous page's `marker` to continue; a page without a
    /// marker is the last one.
    pub async fn account_transactions_page(
        &self,
        account: &AccountId,
        limit: u32,
        marker: Option<Value>,
    ) -> Result<AccountTxPage> {
        let address = account.as_str().to_string();
        let managed = single_attempt(Command::AccountTx, move |request| {
            account_tx_params(request, &address, limit, marker.as_ref());
        })
        .decode(AccountTxPage::from_response);
        self.managed(managed).await
    }

    pub async fn transaction(&self, hash: &str) -> Result<Value> {
        let hash = hash.to_string();
        self.managed(single_attempt(Command::Tx, move |request| {
            request.json("transaction", hash.as_str());
        }))
        .await
    }

    /// Submit a signed, hex-encoded transaction blob
    pub async fn submit(&self, tx_blob: &str, fail_hard: bool) -> Result<Value> {
        let mut request = Request::new(Command::Submit);
        request.json("tx_blob", tx_blob).json("fail_hard", fail_hard);
        self.call(request).await
    }
}

/// A page of `account_tx` results
#[derive(Debug, Clone, PartialEq)]
pub struct AccountTxPage {
    pub transactions: Vec<Value>,
    /// Resume point for the next page; `None` on the last page
    pub marker: Option<Value>,
}

impl AccountTxPage {
    fn from_response(response: &Response) -> Result<Self> {
        let transactions = response
            .result
            .get("transactions")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ClientError::Decode("account_tx result has no transactions".into()))?;
        let marker = response
            .result
            .get("marker")
            .filter(|marker| !marker.is_null())
            .cloned();
        Ok(Self {
            transactions,
            marker,
        })
    }

    pub fn is_last(&self) -> bool {
        self.marker.is_none()
    }
}

/// Managed call that never retries, so a dropped connection ends it at once.
fn single_attempt<F>(command: Command, params: F) -> ManagedRequest<Value>
where
    F: Fn(&mut Request) + Send + 'static,
{
    ManagedRequest::new(command)
        .before_send(params)
        .retry_policy(RetryPolicy::Never)
}

fn account_tx_params(request: &mut Request, account: &str, limit: u32, marker: Option<&Value>) {
    request
        .json("account", account)
        .json("ledger_index_min", -1)
        .json("ledger_index_max", -1)
        .json("limit", limit);
    if let Some(marker) = marker {
        request.json("marker", marker.clone());
    }
}

fn entry_node(response: &Response) -> Result<Value> {
    response
        .result
        .get("node")
        .cloned()
        .ok_or_else(|| ClientError::Decode("ledger_entry result has no node".into()))
}
