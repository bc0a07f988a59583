/*
[INPUT]:  Caller-chosen timing and retry settings
[OUTPUT]: ClientConfig consumed by the worker
[POS]:    Configuration layer - engine tunables
[UPDATE]: When the worker gains a new timer or bound
*/

use std::time::Duration;

use crate::types::Stream;

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Age after which the sweep expires an outstanding request
    pub request_timeout: Duration,
    /// Period of the sweep + dormant-connection watchdog
    pub maintenance_interval: Duration,
    /// Silence after which a connected link is considered dead
    pub dormant_threshold: Duration,
    /// Delay before the passive redial after an unrequested disconnect
    pub reconnect_delay: Duration,
    /// Poll period of an explicit reconnect cycle
    pub reconnect_poll_interval: Duration,
    /// Delay between `connect` and the first dial
    pub connect_delay: Duration,
    /// Delay before a managed request is redispatched
    pub retry_delay: Duration,
    pub max_retry_depth: u32,
    /// Streams subscribed on every connect
    pub default_streams: Vec<Stream>,
    /// Bound for `Client::request_blocking`
    pub blocking_wait_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            maintenance_interval: Duration::from_secs(10),
            dormant_threshold: Duration::from_secs(20),
            reconnect_delay: Duration::from_millis(1_000),
            reconnect_poll_interval: Duration::from_millis(2_000),
            connect_delay: Duration::from_millis(50),
            retry_delay: Duration::from_millis(50),
            max_retry_depth: 10,
            default_streams: vec![Stream::Ledger, Stream::Server],
            blocking_wait_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_dormant_threshold(mut self, threshold: Duration) -> Self {
        self.dormant_threshold = threshold;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_reconnect_poll_interval(mut self, interval: Duration) -> Self {
        self.reconnect_poll_interval = interval;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_retry_depth(mut self, depth: u32) -> Self {
        self.max_retry_depth = depth;
        self
    }

    pub fn with_default_streams(mut self, streams: Vec<Stream>) -> Self {
        self.default_streams = streams;
        self
    }

    pub fn with_blocking_wait_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_wait_timeout = timeout;
        self
    }
}
