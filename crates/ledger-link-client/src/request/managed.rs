/*
[INPUT]:  Command, before-send hook, response decoder, retry predicate, completion callback
[OUTPUT]: Retry decisions for each attempt and exactly one terminal outcome per call
[POS]:    Request layer - managed request retry state machine
[UPDATE]: When changing retry policies or terminal failure semantics
*/

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::call::{Request, RequestId};
use crate::error::{ClientError, Result};
use crate::types::{Command, Response};

pub type RetryPredicate = Box<dyn Fn(Option<&Response>) -> bool + Send>;
pub type BeforeSend = Box<dyn Fn(&mut Request) + Send>;
pub type Decoder<T> = Box<dyn Fn(&Response) -> Result<T> + Send>;
pub type Completion<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Ready-made retry predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Never,
    Always,
    /// Retry on silence and on any error except a definitive "not found"
    UnlessNotFound,
    /// Retry on silence and on transient server errors
    Transient,
}

impl RetryPolicy {
    /// `None` means the attempt ended without any reply (timeout or disconnect)
    pub fn should_retry(self, response: Option<&Response>) -> bool {
        match (self, response) {
            (RetryPolicy::Never, _) => false,
            (RetryPolicy::Always, _) => true,
            (RetryPolicy::UnlessNotFound, None) => true,
            (RetryPolicy::UnlessNotFound, Some(response)) => !response
                .error
                .as_ref()
                .is_some_and(|error| error.is_not_found()),
            (RetryPolicy::Transient, None) => true,
            (RetryPolicy::Transient, Some(response)) => response
                .error
                .as_ref()
                .is_some_and(|error| error.is_transient()),
        }
    }
}

/// Description of a managed request: how to build it, decode it and when to retry.
pub struct ManagedRequest<T> {
    command: Command,
    before_send: BeforeSend,
    decoder: Decoder<T>,
    retry: RetryPredicate,
}

impl ManagedRequest<Value> {
    /// Decodes to the `result` object and never retries until configured otherwise.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            before_send: Box::new(|_| {}),
            decoder: Box::new(|response| Ok(response.result_value())),
            retry: Box::new(|response| RetryPolicy::Never.should_retry(response)),
        }
    }
}

impl<T: Send + 'static> ManagedRequest<T> {
    pub fn command(&self) -> Command {
        self.command
    }

    /// Hook run against every attempt's fresh request before dispatch
    pub fn before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Request) + Send + 'static,
    {
        self.before_send = Box::new(hook);
        self
    }

    pub fn decode<U, F>(self, decoder: F) -> ManagedRequest<U>
    where
        F: Fn(&Response) -> Result<U> + Send + 'static,
    {
        ManagedRequest {
            command: self.command,
            before_send: self.before_send,
            decoder: Box::new(decoder),
            retry: self.retry,
        }
    }

    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&Response>) -> bool + Send + 'static,
    {
        self.retry = Box::new(predicate);
        self
    }

    pub fn retry_policy(self, policy: RetryPolicy) -> Self {
        self.retry_when(move |response| policy.should_retry(response))
    }

    pub(crate) fn with_completion<F>(self, completion: F) -> ManagedCall<T>
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        ManagedCall {
            request: self,
            completion: Some(Box::new(completion)),
        }
    }
}

impl<T> fmt::Debug for ManagedRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedRequest")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Type-erased managed call as held by the worker across attempts
pub(crate) trait RetryableCall: Send {
    fn command(&self) -> Command;
    fn prepare(&self, request: &mut Request);
    fn should_retry(&self, response: Option<&Response>) -> bool;
    /// Deliver the terminal outcome; decoding happens here for successes.
    fn complete(self: Box<Self>, outcome: Result<Response>);
}

pub(crate) struct ManagedCall<T> {
    request: ManagedRequest<T>,
    completion: Option<Completion<T>>,
}

impl<T: Send + 'static> RetryableCall for ManagedCall<T> {
    fn command(&self) -> Command {
        self.request.command
    }

    fn prepare(&self, request: &mut Request) {
        (self.request.before_send)(request);
    }

    fn should_retry(&self, response: Option<&Response>) -> bool {
        (self.request.retry)(response)
    }

    fn complete(mut self: Box<Self>, outcome: Result<Response>) {
        let decoded = outcome.and_then(|response| (self.request.decoder)(&response));
        if let Some(completion) = self.completion.take() {
            completion(decoded);
        }
    }
}

/// Lifecycle stage of one managed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedState {
    /// Numbered but held until the next connect
    Pending,
    AwaitingResponse,
    Succeeded,
    RetryScheduled,
    GaveUp,
}

/// What ended an attempt
#[derive(Debug)]
pub(crate) enum Trigger {
    Response(Response),
    Timeout { request_id: RequestId, elapsed: Duration },
    Disconnected,
}

impl Trigger {
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Trigger::Response(_) => "error response",
            Trigger::Timeout { .. } => "request timed out",
            Trigger::Disconnected => "client disconnected",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Decision {
    Succeed(Response),
    Retry { next_depth: u32 },
    GiveUp(ClientError),
}

impl Decision {
    pub(crate) fn state(&self) -> ManagedState {
        match self {
            Decision::Succeed(_) => ManagedState::Succeeded,
            Decision::Retry { .. } => ManagedState::RetryScheduled,
            Decision::GiveUp(_) => ManagedState::GaveUp,
        }
    }
}

/// Decide how an attempt at `depth` ends.
///
/// Attempts run at depths `0..=max_depth`; a retry that would exceed
/// `max_depth` is turned into `RetriesExhausted`.
pub(crate) fn decide(
    call: &dyn RetryableCall,
    depth: u32,
    max_depth: u32,
    trigger: Trigger,
) -> Decision {
    let (retry, failure) = match trigger {
        Trigger::Response(response) if response.succeeded => {
            return Decision::Succeed(response);
        }
        Trigger::Response(response) => (call.should_retry(Some(&response)), response.to_error()),
        Trigger::Timeout {
            request_id,
            elapsed,
        } => (
            call.should_retry(None),
            ClientError::Timeout {
                request_id,
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            },
        ),
        Trigger::Disconnected => (call.should_retry(None), ClientError::Disconnected),
    };

    if !retry {
        return Decision::GiveUp(failure);
    }

    let next_depth = depth + 1;
    if next_depth > max_depth {
        return Decision::GiveUp(ClientError::RetriesExhausted {
            attempts: depth + 1,
        });
    }
    Decision::Retry { next_depth }
}
