/*
[INPUT]:  Caller operations (connect, requests, subscriptions, listeners)
[OUTPUT]: Commands posted to the single worker; awaited or blocking results
[POS]:    Client layer - cloneable handle over the engine worker
[UPDATE]: When exposing new engine operations
*/

mod api;
mod link;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ClientEventKind, Handler, ListenerId};
use crate::request::{ManagedRequest, ManagedState, Request, RequestEvent, RequestEventKind, RetryableCall};
use crate::transport::{Transport, TrustMaterial};
use crate::types::{AccountId, BookSubscription, Command, Response, ServerInfo, Stream, TransactionResult};

pub use api::AccountTxPage;
use link::Endpoint;
use worker::Worker;

pub(crate) enum WorkerCommand {
    Connect(Endpoint),
    Disconnect,
    Listen {
        kind: ClientEventKind,
        id: ListenerId,
        once: bool,
        handler: Handler<ClientEvent>,
    },
    WhenConnected {
        id: ListenerId,
        handler: Handler<ClientEvent>,
    },
    RemoveListener {
        kind: ClientEventKind,
        id: ListenerId,
    },
    Send(Request),
    Managed(Box<dyn RetryableCall>),
    Subscribe(SubscriptionChange),
    SubscriptionSet(oneshot::Sender<Value>),
    Status(oneshot::Sender<ConnectionSnapshot>),
}

pub(crate) enum SubscriptionChange {
    Streams(Vec<Stream>),
    Accounts(Vec<AccountId>),
    Book(BookSubscription),
}

/// Point-in-time view of the worker's connection state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub manually_disconnected: bool,
    pub reconnecting: bool,
    pub endpoint: Option<String>,
    /// Dispatched requests still awaiting a reply
    pub pending_requests: usize,
    /// Requests held until the next connect
    pub deferred_requests: usize,
    /// Stage of every managed call still in flight, oldest attempt first
    pub managed_calls: Vec<ManagedState>,
    pub server_info: ServerInfo,
    #[serde(skip)]
    pub last_activity_age: Option<Duration>,
}

/// Handle to a running engine.
///
/// Cloning is cheap; every clone talks to the same worker. All engine state
/// lives on the worker task, so handle methods only post commands.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    next_listener: Arc<AtomicU64>,
    shutdown: CancellationToken,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new<T: Transport>(transport: T, config: ClientConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = Worker::new(transport, config.clone(), command_rx, shutdown.clone());
        tokio::spawn(worker.run());

        Self {
            commands,
            next_listener: Arc::new(AtomicU64::new(1)),
            shutdown,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ----- lifecycle -----

    /// Dial `endpoint` shortly on the worker; re-arms automatic reconnection.
    pub fn connect(&self, endpoint: impl Into<String>) -> Result<()> {
        self.post(WorkerCommand::Connect(Endpoint {
            uri: endpoint.into(),
            trust: None,
        }))
    }

    pub fn connect_secure(&self, endpoint: impl Into<String>, trust: TrustMaterial) -> Result<()> {
        self.post(WorkerCommand::Connect(Endpoint {
            uri: endpoint.into(),
            trust: Some(trust),
        }))
    }

    /// Close the connection and stop all automatic reconnection.
    pub fn disconnect(&self) -> Result<()> {
        self.post(WorkerCommand::Disconnect)
    }

    /// Stop the worker. Outstanding callers receive `WorkerStopped`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled() || self.commands.is_closed()
    }

    pub async fn status(&self) -> Result<ConnectionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.post(WorkerCommand::Status(tx))?;
        rx.await.map_err(|_| ClientError::WorkerStopped)
    }

    // ----- events -----

    pub fn on<F>(&self, kind: ClientEventKind, handler: F) -> ListenerId
    where
        F: FnMut(&ClientEvent) + Send + 'static,
    {
        self.listen(kind, false, Box::new(handler))
    }

    pub fn once<F>(&self, kind: ClientEventKind, handler: F) -> ListenerId
    where
        F: FnMut(&ClientEvent) + Send + 'static,
    {
        self.listen(kind, true, Box::new(handler))
    }

    pub fn remove_listener(&self, kind: ClientEventKind, id: ListenerId) {
        let _ = self.post(WorkerCommand::RemoveListener { kind, id });
    }

    /// Run `handler` now if connected, otherwise on the next connect.
    pub fn when_connected<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.allocate_listener();
        let _ = self.post(WorkerCommand::WhenConnected {
            id,
            handler: Box::new(move |_| handler()),
        });
        id
    }

    pub fn on_connected<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut() + Send + 'static,
    {
        self.on(ClientEventKind::Connected, move |_| handler())
    }

    pub fn on_disconnected<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut() + Send + 'static,
    {
        self.on(ClientEventKind::Disconnected, move |_| handler())
    }

    pub fn on_reconnecting<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut() + Send + 'static,
    {
        self.on(ClientEventKind::Reconnecting, move |_| handler())
    }

    pub fn on_reconnected<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut() + Send + 'static,
    {
        self.on(ClientEventKind::Reconnected, move |_| handler())
    }

    pub fn on_message<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.on(ClientEventKind::Message, move |event| {
            if let ClientEvent::Message(message) = event {
                handler(message);
            }
        })
    }

    pub fn on_ledger_closed<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&ServerInfo) + Send + 'static,
    {
        self.on(ClientEventKind::LedgerClosed, move |event| {
            if let ClientEvent::LedgerClosed(info) = event {
                handler(info);
            }
        })
    }

    pub fn on_subscribed<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&ServerInfo) + Send + 'static,
    {
        self.on(ClientEventKind::Subscribed, move |event| {
            if let ClientEvent::Subscribed(info) = event {
                handler(info);
            }
        })
    }

    pub fn on_validated_transaction<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&TransactionResult) + Send + 'static,
    {
        self.on(ClientEventKind::ValidatedTransaction, move |event| {
            if let ClientEvent::ValidatedTransaction(result) = event {
                handler(result);
            }
        })
    }

    pub fn on_transaction_message<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.on(ClientEventKind::TransactionMessage, move |event| {
            if let ClientEvent::TransactionMessage(message) = event {
                handler(message);
            }
        })
    }

    pub fn on_table_message<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.on(ClientEventKind::TableMessage, move |event| {
            if let ClientEvent::TableMessage(message) = event {
                handler(message);
            }
        })
    }

    pub fn on_path_find<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.on(ClientEventKind::PathFind, move |event| {
            if let ClientEvent::PathFind(message) = event {
                handler(message);
            }
        })
    }

    pub fn on_error<F>(&self, mut handler: F) -> ListenerId
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on(ClientEventKind::Error, move |event| {
            if let ClientEvent::Error(cause) = event {
                handler(cause);
            }
        })
    }

    // ----- requests -----

    pub fn new_request(&self, command: Command) -> Request {
        Request::new(command)
    }

    /// Hand a request to the worker. Results arrive through the request's
    /// own handlers.
    pub fn send_request(&self, request: Request) -> Result<()> {
        self.post(WorkerCommand::Send(request))
    }

    /// Send and wait for the reply. Error replies map to `ClientError::Rpc`;
    /// the wait is bounded by the registry timeout.
    pub async fn request(&self, mut request: Request) -> Result<Response> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        attach_outcome(&mut request, move |outcome| {
            let _ = tx.send(outcome);
        });
        self.send_request(request)?;
        rx.recv().await.ok_or(ClientError::WorkerStopped)?
    }

    /// Blocking variant of `request` for callers outside the runtime.
    ///
    /// Must not be called from an async context; the wait is bounded by
    /// `blocking_wait_timeout`.
    pub fn request_blocking(&self, mut request: Request) -> Result<Response> {
        let (tx, rx) = std::sync::mpsc::channel();
        attach_outcome(&mut request, move |outcome| {
            let _ = tx.send(outcome);
        });
        self.send_request(request)?;

        let wait = self.config.blocking_wait_timeout;
        match rx.recv_timeout(wait) {
            Ok(outcome) => outcome,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(ClientError::WaitTimedOut {
                waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(ClientError::WorkerStopped),
        }
    }

    /// Start a managed request; `completion` runs exactly once on the worker.
    pub fn make_managed_request<T, F>(&self, managed: ManagedRequest<T>, completion: F)
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let call: Box<dyn RetryableCall> = Box::new(managed.with_completion(completion));
        if let Err(mpsc::error::SendError(WorkerCommand::Managed(call))) =
            self.commands.send(WorkerCommand::Managed(call))
        {
            call.complete(Err(ClientError::WorkerStopped));
        }
    }

    pub async fn managed<T: Send + 'static>(&self, managed: ManagedRequest<T>) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.make_managed_request(managed, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.map_err(|_| ClientError::WorkerStopped)?
    }

    // ----- subscriptions -----

    pub fn subscribe_accounts<I>(&self, accounts: I) -> Result<()>
    where
        I: IntoIterator<Item = AccountId>,
    {
        self.post(WorkerCommand::Subscribe(SubscriptionChange::Accounts(
            accounts.into_iter().collect(),
        )))
    }

    pub fn subscribe_streams<I>(&self, streams: I) -> Result<()>
    where
        I: IntoIterator<Item = Stream>,
    {
        self.post(WorkerCommand::Subscribe(SubscriptionChange::Streams(
            streams.into_iter().collect(),
        )))
    }

    pub fn subscribe_book(&self, book: BookSubscription) -> Result<()> {
        self.post(WorkerCommand::Subscribe(SubscriptionChange::Book(book)))
    }

    /// The full subscription document the worker would send now
    pub async fn subscription_set(&self) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.post(WorkerCommand::SubscriptionSet(tx))?;
        rx.await.map_err(|_| ClientError::WorkerStopped)
    }

    fn listen(&self, kind: ClientEventKind, once: bool, handler: Handler<ClientEvent>) -> ListenerId {
        let id = self.allocate_listener();
        let _ = self.post(WorkerCommand::Listen {
            kind,
            id,
            once,
            handler,
        });
        id
    }

    fn allocate_listener(&self) -> ListenerId {
        ListenerId::new(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    fn post(&self, command: WorkerCommand) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::WorkerStopped);
        }
        self.commands.send(command).map_err(|_| {
            debug!("command posted after worker stopped");
            ClientError::WorkerStopped
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("shut_down", &self.is_shut_down())
            .field("config", &self.config)
            .finish()
    }
}

/// Route a request's terminal notification into one `Result`
fn attach_outcome<F>(request: &mut Request, sink: F)
where
    F: Fn(Result<Response>) + Clone + Send + 'static,
{
    let on_reply = sink.clone();
    request
        .events_mut()
        .once(RequestEventKind::Response, move |event| {
            if let RequestEvent::Response(response) = event {
                let outcome = if response.succeeded {
                    Ok(response.clone())
                } else {
                    Err(response.to_error())
                };
                on_reply(outcome);
            }
        });
    request
        .events_mut()
        .once(RequestEventKind::Timeout, move |event| {
            if let RequestEvent::Timeout {
                request_id,
                elapsed,
            } = event
            {
                sink(Err(ClientError::Timeout {
                    request_id: *request_id,
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                }));
            }
        });
}
