/*
[INPUT]:  Handle commands, transport signals, timer expirations
[OUTPUT]: Client events, outbound documents, request and managed-call outcomes
[POS]:    Client layer - single worker owning all engine state
[UPDATE]: When changing routing, reconnection or retry scheduling
*/

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, error, info, warn};

use super::link::{Endpoint, Link};
use super::{ConnectionSnapshot, SubscriptionChange, WorkerCommand};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ClientEventKind, Publisher};
use crate::request::{
    Decision, ManagedState, Request, RequestId, RequestRegistry, RetryableCall, Trigger, decide,
};
use crate::subscription::SubscriptionSet;
use crate::transport::{Transport, TransportEvent, TransportHandler};
use crate::types::{Command, MessageType, Response, ServerInfo, TransactionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEvent {
    Dial,
    Redial,
    ReconnectPoll,
    Maintenance,
    Retry(u64),
}

struct ManagedAttempt {
    call: Box<dyn RetryableCall>,
    depth: u32,
}

/// A numbered request waiting for a connection
struct Deferred {
    queued_at: Instant,
    request: Request,
}

pub(crate) struct Worker<T: Transport> {
    config: ClientConfig,
    transport: T,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown: CancellationToken,

    events: Publisher<ClientEvent>,
    link: Link,
    server_info: ServerInfo,
    subscriptions: SubscriptionSet,
    subscribe_ids: HashSet<RequestId>,

    registry: RequestRegistry,
    deferred: VecDeque<Deferred>,
    next_request_id: u64,
    managed: HashMap<RequestId, ManagedAttempt>,
    retries: HashMap<u64, ManagedAttempt>,
    next_retry: u64,

    timers: DelayQueue<TimerEvent>,
    dial_key: Option<delay_queue::Key>,
    redial_key: Option<delay_queue::Key>,
    poll_key: Option<delay_queue::Key>,
}

impl<T: Transport> Worker<T> {
    pub(crate) fn new(
        mut transport: T,
        config: ClientConfig,
        commands: mpsc::UnboundedReceiver<WorkerCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        let (handler, transport_events) = TransportHandler::channel();
        transport.set_handler(handler);

        Self {
            config,
            transport,
            commands,
            transport_events,
            shutdown,
            events: Publisher::new(),
            link: Link::default(),
            server_info: ServerInfo::default(),
            subscriptions: SubscriptionSet::new(),
            subscribe_ids: HashSet::new(),
            registry: RequestRegistry::new(),
            deferred: VecDeque::new(),
            next_request_id: 1,
            managed: HashMap::new(),
            retries: HashMap::new(),
            next_retry: 0,
            timers: DelayQueue::new(),
            dial_key: None,
            redial_key: None,
            poll_key: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.timers
            .insert(TimerEvent::Maintenance, self.config.maintenance_interval);
        debug!("client worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.transport_events.recv() => self.handle_transport(event),
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    self.handle_timer(expired.into_inner());
                }
            }
        }

        self.stop();
    }

    // ----- commands -----

    fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Connect(endpoint) => self.connect(endpoint),
            WorkerCommand::Disconnect => self.disconnect(),
            WorkerCommand::Listen {
                kind,
                id,
                once,
                handler,
            } => self.events.insert(kind, id, once, handler),
            WorkerCommand::WhenConnected { id, mut handler } => {
                if self.link.is_connected() {
                    if catch_unwind(AssertUnwindSafe(|| handler(&ClientEvent::Connected))).is_err() {
                        error!(listener = id.get(), "when_connected handler panicked");
                    }
                } else {
                    self.events.insert(ClientEventKind::Connected, id, true, handler);
                }
            }
            WorkerCommand::RemoveListener { kind, id } => {
                self.events.remove_listener(kind, id);
            }
            WorkerCommand::Send(request) => {
                self.accept(request);
            }
            WorkerCommand::Managed(call) => self.start_attempt(call, 0),
            WorkerCommand::Subscribe(change) => self.subscribe(change),
            WorkerCommand::SubscriptionSet(reply) => {
                let _ = reply.send(self.subscriptions.current_set());
            }
            WorkerCommand::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn connect(&mut self, endpoint: Endpoint) {
        info!(endpoint = %endpoint.uri, secure = endpoint.trust.is_some(), "connect requested");
        self.link.target(endpoint);
        self.cancel_timer(TimerEvent::Dial);
        self.dial_key = Some(self.timers.insert(TimerEvent::Dial, self.config.connect_delay));
    }

    fn disconnect(&mut self) {
        info!("disconnect requested");
        self.link.stop();
        self.cancel_timer(TimerEvent::Dial);
        self.cancel_timer(TimerEvent::Redial);
        self.cancel_timer(TimerEvent::ReconnectPoll);
        self.transport.close();
        self.link_down(false);
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        let now = Instant::now();
        ConnectionSnapshot {
            connected: self.link.is_connected(),
            manually_disconnected: self.link.is_manually_disconnected(),
            reconnecting: self.link.is_reconnecting(),
            endpoint: self.link.endpoint().map(|endpoint| endpoint.uri.clone()),
            pending_requests: self.registry.len(),
            deferred_requests: self.deferred.len(),
            managed_calls: self.managed_states(),
            server_info: self.server_info.clone(),
            last_activity_age: self
                .link
                .last_activity()
                .map(|last| now.saturating_duration_since(last)),
        }
    }

    fn managed_states(&self) -> Vec<ManagedState> {
        let mut ids: Vec<RequestId> = self.managed.keys().copied().collect();
        ids.sort();
        let mut tokens: Vec<u64> = self.retries.keys().copied().collect();
        tokens.sort();

        ids.into_iter()
            .map(|id| {
                if self.registry.contains(id) {
                    ManagedState::AwaitingResponse
                } else {
                    ManagedState::Pending
                }
            })
            .chain(tokens.into_iter().map(|_| ManagedState::RetryScheduled))
            .collect()
    }

    // ----- transport -----

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting { attempt } => {
                debug!(attempt, "transport connecting");
            }
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Disconnected { remote } => {
                debug!(remote, "transport disconnected");
                self.link_down(true);
            }
            TransportEvent::Error(cause) => {
                error!(error = %cause, "transport error");
                self.emit(ClientEvent::Error(cause));
                self.fail_outstanding_managed();
            }
        }
    }

    fn on_connected(&mut self) {
        if self.link.is_manually_disconnected() {
            debug!("ignoring connect signal after manual disconnect");
            return;
        }
        if self.link.is_connected() {
            debug!("ignoring repeated connect signal");
            return;
        }
        self.link.mark_connected(Instant::now());
        info!(
            endpoint = self.link.endpoint().map(|endpoint| endpoint.uri.as_str()),
            "connected"
        );
        self.emit(ClientEvent::Connected);

        while let Some(deferred) = self.deferred.pop_front() {
            self.dispatch(deferred.request);
        }

        self.subscriptions.pause();
        let _ = self
            .subscriptions
            .add_streams(self.config.default_streams.iter().copied());
        let _ = self.subscriptions.resume();
        if !self.subscriptions.is_empty() {
            let document = self.subscriptions.current_set();
            self.request_subscription(document);
        }
    }

    /// Apply the disconnected transition; `allow_redial` is false when the
    /// worker closed the transport itself.
    fn link_down(&mut self, allow_redial: bool) {
        if self.link.mark_disconnected() {
            info!("disconnected");
            self.emit(ClientEvent::Disconnected);
            self.fail_outstanding_managed();
        }

        if allow_redial && self.link.should_redial() && self.redial_key.is_none() {
            debug!(delay_ms = millis(self.config.reconnect_delay), "scheduling redial");
            self.redial_key = Some(
                self.timers
                    .insert(TimerEvent::Redial, self.config.reconnect_delay),
            );
        }
    }

    fn dial(&mut self) {
        let Some(endpoint) = self.link.endpoint().cloned() else {
            return;
        };
        if self.link.is_connected() {
            self.transport.close();
            self.link_down(false);
        }

        let result = match &endpoint.trust {
            Some(trust) => self.transport.connect_secure(&endpoint.uri, trust),
            None => self.transport.connect(&endpoint.uri),
        };
        if let Err(err) = result {
            error!(endpoint = %endpoint.uri, error = %err, "dial failed");
            self.emit(ClientEvent::Error(err.to_string()));
        }
    }

    // ----- timers -----

    fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::Dial => {
                self.dial_key = None;
                self.dial();
            }
            TimerEvent::Redial => {
                self.redial_key = None;
                if self.link.should_redial() && !self.link.is_connected() {
                    info!("redialing");
                    self.dial();
                }
            }
            TimerEvent::ReconnectPoll => {
                self.poll_key = None;
                self.reconnect_poll();
            }
            TimerEvent::Maintenance => self.maintenance(),
            TimerEvent::Retry(token) => {
                if let Some(attempt) = self.retries.remove(&token) {
                    self.start_attempt(attempt.call, attempt.depth);
                }
            }
        }
    }

    fn cancel_timer(&mut self, timer: TimerEvent) {
        let slot = match timer {
            TimerEvent::Dial => &mut self.dial_key,
            TimerEvent::Redial => &mut self.redial_key,
            TimerEvent::ReconnectPoll => &mut self.poll_key,
            TimerEvent::Maintenance | TimerEvent::Retry(_) => return,
        };
        if let Some(key) = slot.take() {
            self.timers.remove(&key);
        }
    }

    fn maintenance(&mut self) {
        // reschedule before the body so a failing tick never ends the cycle
        self.timers
            .insert(TimerEvent::Maintenance, self.config.maintenance_interval);

        let now = Instant::now();
        self.sweep(now);

        if self.link.is_dormant(now, self.config.dormant_threshold) {
            warn!(
                threshold_ms = millis(self.config.dormant_threshold),
                "connection dormant"
            );
            self.start_reconnect_cycle();
        }
    }

    fn start_reconnect_cycle(&mut self) {
        if !self.link.begin_reconnect() {
            return;
        }
        info!("reconnecting");
        self.emit(ClientEvent::Reconnecting);
        self.cancel_timer(TimerEvent::Redial);
        self.transport.close();
        self.link_down(false);
        self.poll_key = Some(self.timers.insert(TimerEvent::ReconnectPoll, Duration::ZERO));
    }

    fn reconnect_poll(&mut self) {
        if !self.link.is_reconnecting() {
            return;
        }
        if self.link.is_connected() {
            self.link.end_reconnect();
            info!("reconnected");
            self.emit(ClientEvent::Reconnected);
            return;
        }

        self.transport.close();
        self.dial();
        self.poll_key = Some(
            self.timers
                .insert(TimerEvent::ReconnectPoll, self.config.reconnect_poll_interval),
        );
    }

    fn sweep(&mut self, now: Instant) {
        let timeout = self.config.request_timeout;
        for mut request in self.registry.sweep(now, timeout) {
            let elapsed = request.elapsed_since_send(now).unwrap_or_default();
            self.expire(&mut request, elapsed);
        }

        let mut waiting = VecDeque::with_capacity(self.deferred.len());
        for mut deferred in std::mem::take(&mut self.deferred) {
            let elapsed = now.saturating_duration_since(deferred.queued_at);
            if elapsed >= timeout {
                self.expire(&mut deferred.request, elapsed);
            } else {
                waiting.push_back(deferred);
            }
        }
        self.deferred = waiting;
    }

    fn expire(&mut self, request: &mut Request, elapsed: Duration) {
        let Some(id) = request.id() else {
            return;
        };
        warn!(
            request_id = %id,
            command = %request.command(),
            elapsed_ms = millis(elapsed),
            "request timed out"
        );
        request.expire(elapsed);
        self.subscribe_ids.remove(&id);
        if let Some(attempt) = self.managed.remove(&id) {
            self.finish_attempt(
                attempt,
                Trigger::Timeout {
                    request_id: id,
                    elapsed,
                },
            );
        }
    }

    // ----- requests -----

    /// Number a request and send it, or hold it until the next connect.
    fn accept(&mut self, mut request: Request) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        request.assign_id(id);

        if self.link.is_connected() {
            self.dispatch(request);
        } else {
            debug!(request_id = %id, command = %request.command(), "deferring request until connected");
            self.deferred.push_back(Deferred {
                queued_at: Instant::now(),
                request,
            });
        }
        id
    }

    fn dispatch(&mut self, mut request: Request) {
        let document = request.to_json();
        let command = request.command();
        request.mark_sent(Instant::now());
        let Some(id) = request.id() else {
            return;
        };
        if let Err(err) = self.registry.register(request) {
            error!(request_id = %id, error = %err, "request not registered");
            return;
        }

        debug!(request_id = %id, %command, "sending request");
        self.emit(ClientEvent::SendMessage(document.clone()));
        if let Err(err) = self.transport.send(&document) {
            warn!(request_id = %id, error = %err, "send failed");
            self.emit(ClientEvent::Error(err.to_string()));
        }
    }

    fn on_response(&mut self, message: Value) {
        let response = match Response::from_message(message) {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "malformed response frame");
                return;
            }
        };

        let id = response.id;
        let Some(mut request) = self.registry.resolve(id) else {
            warn!(request_id = %id, "unsolicited response");
            return;
        };
        debug!(
            request_id = %id,
            command = %request.command(),
            succeeded = response.succeeded,
            elapsed_ms = request.elapsed_since_send(Instant::now()).map(millis),
            "response received"
        );
        request.resolve(response.clone());

        if self.subscribe_ids.remove(&id) {
            self.on_subscribe_reply(&response);
        }
        if let Some(attempt) = self.managed.remove(&id) {
            self.finish_attempt(attempt, Trigger::Response(response));
        }
    }

    // ----- managed requests -----

    fn start_attempt(&mut self, call: Box<dyn RetryableCall>, depth: u32) {
        let mut request = Request::new(call.command());
        if catch_unwind(AssertUnwindSafe(|| call.prepare(&mut request))).is_err() {
            error!(command = %call.command(), "before-send hook panicked");
            deliver(call, Err(ClientError::InvalidRequest("before-send hook panicked".into())));
            return;
        }
        let id = self.accept(request);
        self.managed.insert(id, ManagedAttempt { call, depth });
    }

    fn finish_attempt(&mut self, attempt: ManagedAttempt, trigger: Trigger) {
        let ManagedAttempt { call, depth } = attempt;
        let command = call.command();
        let reason = trigger.reason();

        let decision = decide(call.as_ref(), depth, self.config.max_retry_depth, trigger);
        debug!(%command, depth, state = ?decision.state(), "managed attempt finished");
        match decision {
            Decision::Succeed(response) => deliver(call, Ok(response)),
            Decision::Retry { next_depth } => {
                warn!(%command, depth = next_depth, reason, "retrying managed request");
                let token = self.next_retry;
                self.next_retry += 1;
                self.retries.insert(
                    token,
                    ManagedAttempt {
                        call,
                        depth: next_depth,
                    },
                );
                self.timers
                    .insert(TimerEvent::Retry(token), self.config.retry_delay);
            }
            Decision::GiveUp(err) => {
                warn!(%command, depth, reason, error = %err, "managed request gave up");
                deliver(call, Err(err));
            }
        }
    }

    /// Disconnect trigger for every dispatched managed attempt
    fn fail_outstanding_managed(&mut self) {
        let mut outstanding: Vec<RequestId> = self
            .managed
            .keys()
            .copied()
            .filter(|id| self.registry.contains(*id))
            .collect();
        outstanding.sort();

        for id in outstanding {
            self.registry.remove(id);
            if let Some(attempt) = self.managed.remove(&id) {
                self.finish_attempt(attempt, Trigger::Disconnected);
            }
        }
    }

    // ----- subscriptions -----

    fn subscribe(&mut self, change: SubscriptionChange) {
        let document = match change {
            SubscriptionChange::Streams(streams) => self.subscriptions.add_streams(streams),
            SubscriptionChange::Accounts(accounts) => self.subscriptions.add_accounts(accounts),
            SubscriptionChange::Book(book) => self.subscriptions.add_book(book),
        };
        // while offline the next connect sends the full set anyway
        if let Some(document) = document
            && self.link.is_connected()
        {
            self.request_subscription(document);
        }
    }

    fn request_subscription(&mut self, document: Value) {
        let mut request = Request::new(Command::Subscribe);
        if let Value::Object(fields) = document {
            request.merge(fields);
        }
        let id = self.accept(request);
        self.subscribe_ids.insert(id);
    }

    fn on_subscribe_reply(&mut self, response: &Response) {
        if response.succeeded {
            self.server_info.update(&response.result);
            info!(
                ledger_index = self.server_info.ledger_index,
                "subscription acknowledged"
            );
            self.emit(ClientEvent::Subscribed(self.server_info.clone()));
        } else {
            let err = response.to_error();
            warn!(error = %err, "subscription rejected");
            self.emit(ClientEvent::Error(err.to_string()));
        }
    }

    // ----- inbound routing -----

    fn on_message(&mut self, message: Value) {
        self.link.touch(Instant::now());
        self.emit(ClientEvent::Message(message.clone()));

        match MessageType::of(&message) {
            MessageType::ServerStatus => {
                if let Some(fields) = message.as_object() {
                    self.server_info.update(fields);
                }
            }
            MessageType::LedgerClosed => {
                if let Some(fields) = message.as_object() {
                    self.server_info.update(fields);
                }
                debug!(ledger_index = self.server_info.ledger_index, "ledger closed");
                self.emit(ClientEvent::LedgerClosed(self.server_info.clone()));
            }
            MessageType::Response => self.on_response(message),
            MessageType::Transaction => {
                let result = TransactionResult::from_notification(&message);
                if result.validated {
                    self.emit(ClientEvent::ValidatedTransaction(result));
                }
            }
            MessageType::SingleTransaction => self.emit(ClientEvent::TransactionMessage(message)),
            MessageType::Table => self.emit(ClientEvent::TableMessage(message)),
            MessageType::PathFind => self.emit(ClientEvent::PathFind(message)),
            MessageType::Unknown => {
                let message_type = message.get("type").and_then(|kind| kind.as_str());
                warn!(message_type, "unhandled message type");
            }
        }

        self.emit(ClientEvent::StateChange);
    }

    fn emit(&mut self, event: ClientEvent) {
        self.events.emit(&event);
    }

    fn stop(&mut self) {
        info!(
            pending = self.registry.len(),
            managed = self.managed.len() + self.retries.len(),
            "client worker stopping"
        );
        self.transport.close();

        let mut calls: Vec<Box<dyn RetryableCall>> = self
            .managed
            .drain()
            .map(|(_, attempt)| attempt.call)
            .chain(self.retries.drain().map(|(_, attempt)| attempt.call))
            .collect();

        // commands queued behind the shutdown never run
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let WorkerCommand::Managed(call) = command {
                calls.push(call);
            }
        }
        for call in calls {
            deliver(call, Err(ClientError::WorkerStopped));
        }

        // dropping requests releases their waiters with `WorkerStopped`
        self.registry.drain();
        self.deferred.clear();
        self.events.clear();
    }
}

fn deliver(call: Box<dyn RetryableCall>, outcome: Result<Response>) {
    let command = call.command();
    if catch_unwind(AssertUnwindSafe(move || call.complete(outcome))).is_err() {
        error!(%command, "managed request completion panicked");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
