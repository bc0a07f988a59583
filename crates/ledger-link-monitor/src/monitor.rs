/*
[INPUT]:  Client handle + MonitorConfig + shutdown token
[OUTPUT]: Structured log lines for ledger and connection activity, run statistics
[POS]:    Runner layer - wires client events to logs until shutdown
[UPDATE]: When following new event kinds or changing the report format
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use ledger_link_client::{Client, ClientEventKind, ListenerId, TrustMaterial};
use tokio::time::{Instant, Interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

#[derive(Debug, Default)]
struct Counters {
    ledgers: AtomicU64,
    validated_transactions: AtomicU64,
    reconnects: AtomicU64,
    errors: AtomicU64,
}

/// Totals observed since the monitor started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub ledgers: u64,
    pub validated_transactions: u64,
    pub reconnects: u64,
    pub errors: u64,
}

/// Follows one node: subscribes the configured targets and logs what arrives.
pub struct Monitor {
    client: Client,
    config: MonitorConfig,
    counters: Arc<Counters>,
    listeners: Vec<(ClientEventKind, ListenerId)>,
}

impl Monitor {
    pub fn new(client: Client, config: MonitorConfig) -> Self {
        Self {
            client,
            config,
            counters: Arc::new(Counters::default()),
            listeners: Vec::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            ledgers: self.counters.ledgers.load(Ordering::Relaxed),
            validated_transactions: self.counters.validated_transactions.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Register listeners, queue subscriptions and start connecting.
    ///
    /// Subscriptions are queued before the first dial so the initial
    /// subscribe carries the whole configured set.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if !self.listeners.is_empty() {
            return Ok(());
        }
        self.attach_listeners();

        if !self.config.streams.is_empty() {
            self.client
                .subscribe_streams(self.config.streams.iter().copied())
                .context("subscribe streams")?;
        }
        if !self.config.accounts.is_empty() {
            self.client
                .subscribe_accounts(self.config.accounts.iter().cloned())
                .context("subscribe accounts")?;
        }
        for book in &self.config.books {
            self.client
                .subscribe_book(book.clone())
                .context("subscribe book")?;
        }

        match &self.config.trust_certificate {
            Some(path) => {
                let trust = TrustMaterial::from_file(path).context("load trust certificate")?;
                self.client
                    .connect_secure(self.config.endpoint.as_str(), trust)
                    .context("connect")?;
            }
            None => self
                .client
                .connect(self.config.endpoint.as_str())
                .context("connect")?,
        }

        info!(
            endpoint = %self.config.endpoint,
            accounts = self.config.accounts.len(),
            books = self.config.books.len(),
            streams = self.config.streams.len(),
            "monitor started"
        );
        Ok(())
    }

    /// Run until `shutdown` fires, then disconnect and stop the client.
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<MonitorStats> {
        self.start()?;

        let mut reports = self
            .config
            .report_interval()
            .map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = next_report(&mut reports) => self.report().await,
            }
        }

        self.stop();
        let stats = self.stats();
        info!(
            ledgers = stats.ledgers,
            validated_transactions = stats.validated_transactions,
            reconnects = stats.reconnects,
            errors = stats.errors,
            "monitor stopped"
        );
        Ok(stats)
    }

    /// Log one status line from the client's connection snapshot
    pub async fn report(&self) {
        match self.client.status().await {
            Ok(status) => info!(
                connected = status.connected,
                reconnecting = status.reconnecting,
                pending_requests = status.pending_requests,
                deferred_requests = status.deferred_requests,
                managed_calls = status.managed_calls.len(),
                ledger_index = status.server_info.ledger_index,
                last_activity_ms = status.last_activity_age.map(duration_ms),
                "status"
            ),
            Err(err) => warn!(error = %err, "status unavailable"),
        }
    }

    fn stop(&mut self) {
        for (kind, id) in self.listeners.drain(..) {
            self.client.remove_listener(kind, id);
        }
        if let Err(err) = self.client.disconnect() {
            debug!(error = %err, "disconnect after worker stop");
        }
        self.client.shutdown();
    }

    fn attach_listeners(&mut self) {
        let endpoint = self.config.endpoint.clone();
        let id = self.client.on_connected(move || {
            info!(endpoint = %endpoint, "node connected");
        });
        self.listeners.push((ClientEventKind::Connected, id));

        let id = self.client.on_disconnected(|| warn!("node disconnected"));
        self.listeners.push((ClientEventKind::Disconnected, id));

        let id = self
            .client
            .on_reconnecting(|| warn!("connection went quiet, reconnecting"));
        self.listeners.push((ClientEventKind::Reconnecting, id));

        let counters = self.counters.clone();
        let id = self.client.on_reconnected(move || {
            let total = counters.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
            info!(reconnects = total, "reconnected");
        });
        self.listeners.push((ClientEventKind::Reconnected, id));

        let id = self.client.on_subscribed(|info| {
            info!(
                ledger_index = info.ledger_index,
                fee_base = info.fee_base,
                "subscription acknowledged"
            );
        });
        self.listeners.push((ClientEventKind::Subscribed, id));

        let counters = self.counters.clone();
        let id = self.client.on_ledger_closed(move |info| {
            counters.ledgers.fetch_add(1, Ordering::Relaxed);
            info!(
                ledger_index = info.ledger_index,
                ledger_hash = info.ledger_hash.as_deref(),
                txn_count = info.txn_count,
                close_time = ?info.ledger_close_time(),
                "ledger closed"
            );
        });
        self.listeners.push((ClientEventKind::LedgerClosed, id));

        let counters = self.counters.clone();
        let id = self.client.on_validated_transaction(move |tx| {
            counters.validated_transactions.fetch_add(1, Ordering::Relaxed);
            info!(
                hash = tx.hash.as_deref(),
                ledger_index = tx.ledger_index,
                account = tx.initiating_account.as_ref().map(|account| account.as_str()),
                engine_result = tx.engine_result.as_deref(),
                "validated transaction"
            );
        });
        self.listeners.push((ClientEventKind::ValidatedTransaction, id));

        let counters = self.counters.clone();
        let id = self.client.on_error(move |cause| {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = cause, "client error");
        });
        self.listeners.push((ClientEventKind::Error, id));
    }
}

async fn next_report(reports: &mut Option<Interval>) {
    match reports {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
