//! clipstream-core: shared types: configuration, the client message protocol,
//! and binary frame demultiplexing. All other clipstream crates depend on this one.

pub mod config;
pub mod message;
pub mod wire;

pub use message::{ControlMessage, OutboundMessage, ServerEvent, SessionHello, StreamAction};
pub use wire::{StreamType, TagTable};
