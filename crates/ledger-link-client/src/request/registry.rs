/*
[INPUT]:  Dispatched requests, correlated response ids, sweep clock
[OUTPUT]: Removal of resolved or expired requests (exactly once)
[POS]:    Request layer - outstanding-request bookkeeping owned by the worker
[UPDATE]: When changing timeout accounting or registration rules
*/

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;

use tokio::time::Instant;

use super::call::{Request, RequestId};
use crate::error::{ClientError, Result};

/// Ordered collection of outstanding requests keyed by id.
///
/// Membership is the single source of truth for "still outstanding": a
/// request leaves exactly once, through `resolve`, `remove` or `sweep`.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: BTreeMap<RequestId, Request>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dispatched request. Fails on a missing or duplicate id.
    pub fn register(&mut self, request: Request) -> Result<()> {
        let id = request
            .id()
            .ok_or_else(|| ClientError::InvalidRequest("dispatched without an id".into()))?;

        match self.requests.entry(id) {
            Entry::Occupied(_) => Err(ClientError::DuplicateRequestId(id)),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    /// Remove the request matching a reply id
    pub fn resolve(&mut self, id: RequestId) -> Option<Request> {
        self.requests.remove(&id)
    }

    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        self.requests.remove(&id)
    }

    /// Evict every request with `now - send_time >= timeout`, oldest id first
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<Request> {
        let expired: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|(_, request)| {
                request
                    .elapsed_since_send(now)
                    .is_some_and(|elapsed| elapsed >= timeout)
            })
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.requests.remove(&id))
            .collect()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.contains_key(&id)
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.requests.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Command;

    fn sent(id: u64, at: Instant) -> Request {
        let mut request = Request::new(Command::Ping);
        request.assign_id(RequestId::new(id));
        request.mark_sent(at);
        request
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let now = Instant::now();
        let mut registry = RequestRegistry::new();
        registry.register(sent(1, now)).unwrap();

        let err = registry.register(sent(1, now)).unwrap_err();
        assert!(matches!(err, ClientError::DuplicateRequestId(id) if id == RequestId::new(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_unassigned_id() {
        let mut registry = RequestRegistry::new();
        assert!(registry.register(Request::new(Command::Ping)).is_err());
    }

    #[test]
    fn test_resolve_removes_exactly_once() {
        let now = Instant::now();
        let mut registry = RequestRegistry::new();
        registry.register(sent(1, now)).unwrap();
        registry.register(sent(2, now)).unwrap();

        // out-of-order reply for 2 leaves 1 pending
        assert!(registry.resolve(RequestId::new(2)).is_some());
        assert!(registry.contains(RequestId::new(1)));
        assert!(registry.resolve(RequestId::new(2)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_honors_threshold() {
        let timeout = Duration::from_secs(20);
        let start = Instant::now();
        let mut registry = RequestRegistry::new();
        registry.register(sent(1, start)).unwrap();

        tokio::time::advance(timeout - Duration::from_millis(1)).await;
        assert!(registry.sweep(Instant::now(), timeout).is_empty());
        assert!(registry.contains(RequestId::new(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        let expired = registry.sweep(Instant::now(), timeout);
        assert_eq!(expired.len(), 1);
        assert!(registry.is_empty());
        assert!(registry.sweep(Instant::now(), timeout).is_empty());
    }

    #[test]
    fn test_sweep_ignores_unsent_requests() {
        let mut registry = RequestRegistry::new();
        let mut request = Request::new(Command::Ping);
        request.assign_id(RequestId::new(5));
        registry.register(request).unwrap();

        let later = Instant::now() + Duration::from_secs(3600);
        assert!(registry.sweep(later, Duration::from_secs(1)).is_empty());
    }
}
