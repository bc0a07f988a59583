/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed monitor configuration and the derived engine config
[POS]:    Configuration layer - node endpoint, subscriptions, logging
[UPDATE]: When adding new configuration options
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use ledger_link_client::{AccountId, BookSubscription, ClientConfig, Stream};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the ledger monitor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Node WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: String,
    /// PEM bundle of a private CA; only meaningful with `wss://`
    #[serde(default)]
    pub trust_certificate: Option<PathBuf>,
    /// Accounts whose transactions are followed
    #[serde(default)]
    pub accounts: Vec<AccountId>,
    /// Order books to follow
    #[serde(default)]
    pub books: Vec<BookSubscription>,
    /// Streams in addition to the engine defaults
    #[serde(default)]
    pub streams: Vec<Stream>,
    /// Seconds between status reports; 0 disables them
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Log sink configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive used when `--log-level` is not given
    #[serde(default)]
    pub level: Option<String>,
    /// Directory for daily-rolling log files; stderr only when absent
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}

/// Millisecond overrides for the engine timers
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    pub request_timeout_ms: Option<u64>,
    pub maintenance_interval_ms: Option<u64>,
    pub dormant_threshold_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub reconnect_poll_interval_ms: Option<u64>,
    pub connect_delay_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_depth: Option<u32>,
    pub blocking_wait_timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// Engine defaults with every configured override applied
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        let ms = Duration::from_millis;

        if let Some(value) = self.request_timeout_ms {
            config = config.with_request_timeout(ms(value));
        }
        if let Some(value) = self.maintenance_interval_ms {
            config = config.with_maintenance_interval(ms(value));
        }
        if let Some(value) = self.dormant_threshold_ms {
            config = config.with_dormant_threshold(ms(value));
        }
        if let Some(value) = self.reconnect_delay_ms {
            config = config.with_reconnect_delay(ms(value));
        }
        if let Some(value) = self.reconnect_poll_interval_ms {
            config = config.with_reconnect_poll_interval(ms(value));
        }
        if let Some(value) = self.connect_delay_ms {
            config = config.with_connect_delay(ms(value));
        }
        if let Some(value) = self.retry_delay_ms {
            config = config.with_retry_delay(ms(value));
        }
        if let Some(depth) = self.max_retry_depth {
            config = config.with_max_retry_depth(depth);
        }
        if let Some(value) = self.blocking_wait_timeout_ms {
            config = config.with_blocking_wait_timeout(ms(value));
        }
        config
    }

    fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("maintenance_interval_ms", self.maintenance_interval_ms),
            ("dormant_threshold_ms", self.dormant_threshold_ms),
            ("reconnect_poll_interval_ms", self.reconnect_poll_interval_ms),
        ];
        for (name, value) in intervals {
            if value == Some(0) {
                bail!("engine.{name} must be greater than zero");
            }
        }
        Ok(())
    }
}

impl MonitorConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let secure = match self.endpoint.split_once("://") {
            Some(("wss", _)) => true,
            Some(("ws", _)) => false,
            _ => bail!("endpoint must be a ws:// or wss:// url: {}", self.endpoint),
        };
        if self.trust_certificate.is_some() && !secure {
            bail!("trust_certificate requires a wss:// endpoint");
        }
        self.engine.validate()
    }

    pub fn client_config(&self) -> ClientConfig {
        self.engine.to_client_config()
    }

    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_secs > 0).then(|| Duration::from_secs(self.report_interval_secs))
    }
}

fn default_report_interval_secs() -> u64 {
    60
}

fn default_file_prefix() -> String {
    "ledger-link-monitor.log".to_string()
}
