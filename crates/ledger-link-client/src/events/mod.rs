/*
[INPUT]:  Event kinds and handler closures
[OUTPUT]: Typed publisher plus the client-level event vocabulary
[POS]:    Event layer - notification plumbing shared by requests and the client
[UPDATE]: When adding new event kinds
*/

pub mod client;
pub mod publisher;

pub use client::{ClientEvent, ClientEventKind};
pub use publisher::{Event, Handler, ListenerId, Publisher};
