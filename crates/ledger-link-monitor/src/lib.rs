/*
[INPUT]:  Public API exports for ledger-link-monitor crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod monitor;

pub use config::{EngineConfig, LoggingConfig, MonitorConfig};
pub use monitor::{Monitor, MonitorStats};
