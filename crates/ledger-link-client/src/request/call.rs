/*
[INPUT]:  Command verb, caller-supplied payload fields, correlated response
[OUTPUT]: Outbound request document and per-request notifications
[POS]:    Request layer - one outstanding correlated call
[UPDATE]: When request documents gain engine-managed fields
*/

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::events::{Event, ListenerId, Publisher};
use crate::types::{Command, Response};

/// Engine-assigned correlation id echoed back by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request notifications
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// Any correlated reply, published before `Success` / `Error`
    Response(Response),
    Success(Response),
    Error(Response),
    /// Expired by the sweep without a reply
    Timeout { request_id: RequestId, elapsed: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEventKind {
    Response,
    Success,
    Error,
    Timeout,
}

impl Event for RequestEvent {
    type Kind = RequestEventKind;

    fn kind(&self) -> RequestEventKind {
        match self {
            RequestEvent::Response(_) => RequestEventKind::Response,
            RequestEvent::Success(_) => RequestEventKind::Success,
            RequestEvent::Error(_) => RequestEventKind::Error,
            RequestEvent::Timeout { .. } => RequestEventKind::Timeout,
        }
    }
}

/// One correlated call.
///
/// Built by callers (payload fields + handlers), then handed to the client,
/// which numbers it on its worker when accepting it. A request is never
/// reused after it resolves or expires.
pub struct Request {
    id: Option<RequestId>,
    command: Command,
    payload: Map<String, Value>,
    send_time: Option<Instant>,
    response: Option<Response>,
    events: Publisher<RequestEvent>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            id: None,
            command,
            payload: Map::new(),
            send_time: None,
            response: None,
            events: Publisher::new(),
        }
    }

    pub fn id(&self) -> Option<RequestId> {
        self.id
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn send_time(&self) -> Option<Instant> {
        self.send_time
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Set a payload field. `command` and `id` are owned by the engine.
    pub fn json(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if key != "command" && key != "id" {
            self.payload.insert(key, value.into());
        }
        self
    }

    /// Merge every field of `fields` into the payload
    pub fn merge(&mut self, fields: Map<String, Value>) -> &mut Self {
        for (key, value) in fields {
            self.json(key, value);
        }
        self
    }

    /// Full outbound document: payload plus `command` and `id`
    pub fn to_json(&self) -> Value {
        let mut document = self.payload.clone();
        document.insert("command".to_string(), Value::from(self.command.as_str()));
        if let Some(id) = self.id {
            document.insert("id".to_string(), Value::from(id.get()));
        }
        Value::Object(document)
    }

    pub fn on_response<F>(&mut self, mut handler: F) -> ListenerId
    where
        F: FnMut(&Response) + Send + 'static,
    {
        self.events.on(RequestEventKind::Response, move |event| {
            if let RequestEvent::Response(response) = event {
                handler(response);
            }
        })
    }

    pub fn on_success<F>(&mut self, mut handler: F) -> ListenerId
    where
        F: FnMut(&Response) + Send + 'static,
    {
        self.events.on(RequestEventKind::Success, move |event| {
            if let RequestEvent::Success(response) = event {
                handler(response);
            }
        })
    }

    pub fn on_error<F>(&mut self, mut handler: F) -> ListenerId
    where
        F: FnMut(&Response) + Send + 'static,
    {
        self.events.on(RequestEventKind::Error, move |event| {
            if let RequestEvent::Error(response) = event {
                handler(response);
            }
        })
    }

    pub fn on_timeout<F>(&mut self, mut handler: F) -> ListenerId
    where
        F: FnMut() + Send + 'static,
    {
        self.events
            .on(RequestEventKind::Timeout, move |_| handler())
    }

    pub fn events_mut(&mut self) -> &mut Publisher<RequestEvent> {
        &mut self.events
    }

    pub fn elapsed_since_send(&self, now: Instant) -> Option<Duration> {
        self.send_time.map(|sent| now.saturating_duration_since(sent))
    }

    pub(crate) fn assign_id(&mut self, id: RequestId) {
        self.id = Some(id);
    }

    pub(crate) fn mark_sent(&mut self, now: Instant) {
        self.send_time = Some(now);
    }

    /// Store the reply and publish `Response` then `Success` or `Error`
    pub(crate) fn resolve(&mut self, response: Response) {
        self.events.emit(&RequestEvent::Response(response.clone()));
        let outcome = if response.succeeded {
            RequestEvent::Success(response.clone())
        } else {
            RequestEvent::Error(response.clone())
        };
        self.events.emit(&outcome);
        self.response = Some(response);
    }

    /// Publish `Timeout`; requests are always numbered before they can expire
    pub(crate) fn expire(&mut self, elapsed: Duration) {
        if let Some(request_id) = self.id {
            self.events
                .emit(&RequestEvent::Timeout { request_id, elapsed });
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("payload", &self.payload)
            .field("send_time", &self.send_time)
            .field("responded", &self.response.is_some())
            .finish()
    }
}
