/*
[INPUT]:  Desired streams, accounts and order books; pause/resume brackets
[OUTPUT]: Full subscription document to dispatch as one subscribe request
[POS]:    Subscription layer - declarative desired-state set owned by the worker
[UPDATE]: When the subscribe document gains new sections
*/

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::types::{AccountId, BookSubscription, Stream};

/// Declarative set of server-side subscriptions.
///
/// Membership is idempotent and every emission is the full current set, so
/// replaying `current_set()` after a reconnect restores the remote state.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    streams: BTreeSet<Stream>,
    accounts: BTreeSet<AccountId>,
    books: BTreeSet<BookSubscription>,
    paused: u32,
    dirty: bool,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&mut self, stream: Stream) -> Option<Value> {
        let changed = self.streams.insert(stream);
        self.after_change(changed)
    }

    pub fn add_streams<I>(&mut self, streams: I) -> Option<Value>
    where
        I: IntoIterator<Item = Stream>,
    {
        let mut changed = false;
        for stream in streams {
            changed |= self.streams.insert(stream);
        }
        self.after_change(changed)
    }

    pub fn add_account(&mut self, account: AccountId) -> Option<Value> {
        let changed = self.accounts.insert(account);
        self.after_change(changed)
    }

    pub fn add_accounts<I>(&mut self, accounts: I) -> Option<Value>
    where
        I: IntoIterator<Item = AccountId>,
    {
        let mut changed = false;
        for account in accounts {
            changed |= self.accounts.insert(account);
        }
        self.after_change(changed)
    }

    pub fn add_book(&mut self, book: BookSubscription) -> Option<Value> {
        let changed = self.books.insert(book);
        self.after_change(changed)
    }

    /// Start a batch; nested pauses are counted.
    pub fn pause(&mut self) {
        self.paused += 1;
    }

    /// End a batch. Returns the combined document when the outermost pause
    /// ends and the batch changed anything.
    pub fn resume(&mut self) -> Option<Value> {
        if self.paused == 0 {
            return None;
        }
        self.paused -= 1;
        if self.paused == 0 && self.dirty {
            self.dirty = false;
            return Some(self.current_set());
        }
        None
    }

    pub fn is_paused(&self) -> bool {
        self.paused > 0
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty() && self.accounts.is_empty() && self.books.is_empty()
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts.iter()
    }

    pub fn books(&self) -> impl Iterator<Item = &BookSubscription> {
        self.books.iter()
    }

    /// The full document, sections in a fixed order and empty sections omitted
    pub fn current_set(&self) -> Value {
        let mut document = Map::new();
        if !self.streams.is_empty() {
            document.insert(
                "streams".to_string(),
                self.streams.iter().map(|s| Value::from(s.as_str())).collect(),
            );
        }
        if !self.accounts.is_empty() {
            document.insert(
                "accounts".to_string(),
                self.accounts
                    .iter()
                    .map(|a| Value::from(a.as_str()))
                    .collect(),
            );
        }
        if !self.books.is_empty() {
            document.insert(
                "books".to_string(),
                self.books.iter().map(BookSubscription::to_json).collect(),
            );
        }
        Value::Object(document)
    }

    fn after_change(&mut self, changed: bool) -> Option<Value> {
        if !changed {
            return None;
        }
        if self.is_paused() {
            self.dirty = true;
            return None;
        }
        Some(self.current_set())
    }
}
