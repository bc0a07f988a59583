/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public ledger-link client crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod request;
pub mod subscription;
pub mod transport;
pub mod types;

pub use client::{AccountTxPage, Client, ConnectionSnapshot};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{ClientEvent, ClientEventKind, Event, ListenerId, Publisher};
pub use request::{
    ManagedRequest, ManagedState, Request, RequestEvent, RequestEventKind, RequestId,
    RequestRegistry, RetryPolicy,
};
pub use subscription::SubscriptionSet;
pub use transport::{Transport, TransportEvent, TransportHandler, TrustMaterial, WebSocketTransport};

// Re-export all types
pub use types::*;
