/*
[INPUT]:  Caller-built requests and managed request descriptions
[OUTPUT]: Correlated calls, outstanding-request registry, retry decisions
[POS]:    Request layer - module root
[UPDATE]: When adding request-level modules
*/

mod call;
mod managed;
mod registry;

pub use call::{Request, RequestEvent, RequestEventKind, RequestId};
pub use managed::{
    BeforeSend, Completion, Decoder, ManagedRequest, ManagedState, RetryPolicy, RetryPredicate,
};
pub use registry::RequestRegistry;

pub(crate) use managed::{Decision, RetryableCall, Trigger, decide};
