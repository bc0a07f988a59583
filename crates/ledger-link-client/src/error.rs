/*
[INPUT]:  Error sources (transport, WebSocket, serialization, remote RPC errors, worker state)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

use crate::request::RequestId;
use crate::types::RpcError;

/// Main error type for the ledger client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport reported a failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// TLS configuration failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// The node rejected the request
    #[error("RPC error ({error}): {message}")]
    Rpc { error: RpcError, message: String },

    /// No response arrived within the request timeout
    #[error("Request {request_id} timed out after {elapsed_ms}ms")]
    Timeout { request_id: RequestId, elapsed_ms: u64 },

    /// The connection dropped while the request was outstanding
    #[error("Connection lost while request was outstanding")]
    Disconnected,

    /// Managed request gave up after the maximum retry depth
    #[error("Gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Response decoder rejected a successful response
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A request with this id is already registered
    #[error("Request id {0} is already registered")]
    DuplicateRequestId(RequestId),

    /// Request cannot be dispatched as built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Operation needs a live connection
    #[error("Not connected")]
    NotConnected,

    /// A blocking caller stopped waiting for the worker
    #[error("No result after waiting {waited_ms}ms")]
    WaitTimedOut { waited_ms: u64 },

    /// The engine worker has shut down
    #[error("Client worker stopped")]
    WorkerStopped,

    /// Invalid response from the node
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Check if the error is worth retrying at the caller level
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_)
            | ClientError::WebSocket(_)
            | ClientError::Timeout { .. }
            | ClientError::Disconnected
            | ClientError::WaitTimedOut { .. }
            | ClientError::NotConnected => true,
            ClientError::Rpc { error, .. } => error.is_transient(),
            _ => false,
        }
    }

    /// Check if the node answered with a definitive "not found"
    pub fn is_rpc_not_found(&self) -> bool {
        matches!(self, ClientError::Rpc { error, .. } if error.is_not_found())
    }
}

/// Result type alias for ledger client operations
pub type Result<T> = std::result::Result<T, ClientError>;
