/*
[INPUT]:  Node protocol schema and serde requirements
[OUTPUT]: Typed Rust structs/enums for commands, frames and payloads
[POS]:    Data layer - type definitions for node communication
[UPDATE]: When protocol schema changes or new types added
*/

pub mod command;
pub mod message;
pub mod models;
pub mod response;

pub use command::*;
pub use message::*;
pub use models::*;
pub use response::*;
