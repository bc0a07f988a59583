/*
[INPUT]:  Transport transitions, inbound activity, maintenance ticks
[OUTPUT]: Connection flags and redial / watchdog decisions for the worker
[POS]:    Client layer - connection lifecycle state
[UPDATE]: When changing reconnection rules
*/

use std::time::Duration;

use tokio::time::Instant;

use crate::transport::TrustMaterial;

/// Where to (re)dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub uri: String,
    pub trust: Option<TrustMaterial>,
}

#[derive(Debug, Default)]
pub(crate) struct Link {
    connected: bool,
    manually_disconnected: bool,
    last_activity: Option<Instant>,
    endpoint: Option<Endpoint>,
    reconnect_cycle: bool,
}

impl Link {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_manually_disconnected(&self) -> bool {
        self.manually_disconnected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnect_cycle
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// A user `connect`: remember the endpoint and re-arm automatic redial
    pub fn target(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
        self.manually_disconnected = false;
    }

    /// A user `disconnect`: nothing reconnects until the next `target`
    pub fn stop(&mut self) {
        self.manually_disconnected = true;
        self.reconnect_cycle = false;
    }

    pub fn mark_connected(&mut self, now: Instant) {
        self.connected = true;
        self.last_activity = Some(now);
    }

    /// Returns whether the link was connected before
    pub fn mark_disconnected(&mut self) -> bool {
        std::mem::replace(&mut self.connected, false)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Passive redial applies only outside an explicit reconnect cycle
    pub fn should_redial(&self) -> bool {
        !self.manually_disconnected && !self.reconnect_cycle && self.endpoint.is_some()
    }

    pub fn is_dormant(&self, now: Instant, threshold: Duration) -> bool {
        if self.manually_disconnected || !self.connected {
            return false;
        }
        self.last_activity
            .is_some_and(|last| now.saturating_duration_since(last) > threshold)
    }

    /// Enter the reconnect cycle; false if one is already running
    pub fn begin_reconnect(&mut self) -> bool {
        if self.reconnect_cycle || self.manually_disconnected {
            return false;
        }
        self.reconnect_cycle = true;
        self.last_activity = None;
        true
    }

    pub fn end_reconnect(&mut self) {
        self.reconnect_cycle = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            uri: "ws://node.test:6006".into(),
            trust: None,
        }
    }

    #[test]
    fn test_manual_stop_blocks_redial_until_retargeted() {
        let mut link = Link::default();
        assert!(!link.should_redial());

        link.target(endpoint());
        assert!(link.should_redial());

        link.stop();
        assert!(!link.should_redial());
        assert!(!link.begin_reconnect());

        link.target(endpoint());
        assert!(link.should_redial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dormant_only_after_threshold() {
        let threshold = Duration::from_secs(20);
        let mut link = Link::default();
        link.target(endpoint());
        link.mark_connected(Instant::now());

        tokio::time::advance(threshold).await;
        assert!(!link.is_dormant(Instant::now(), threshold));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(link.is_dormant(Instant::now(), threshold));

        link.touch(Instant::now());
        assert!(!link.is_dormant(Instant::now(), threshold));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cycle_is_entered_once() {
        let mut link = Link::default();
        link.target(endpoint());
        link.mark_connected(Instant::now());

        assert!(link.begin_reconnect());
        assert!(link.last_activity().is_none());
        assert!(!link.begin_reconnect());
        assert!(!link.should_redial());

        link.end_reconnect();
        assert!(link.should_redial());
    }

    #[test]
    fn test_mark_disconnected_reports_transition() {
        let mut link = Link::default();
        assert!(!link.mark_disconnected());
        link.mark_connected(Instant::now());
        assert!(link.mark_disconnected());
        assert!(!link.is_connected());
    }
}
