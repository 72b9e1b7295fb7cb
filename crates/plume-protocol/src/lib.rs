//! Wire protocol for Plume.
//!
//! This crate defines the "language" spoken with the broker:
//!
//! - **Parser** ([`FrameParser`]): an incremental state machine that turns
//!   an arbitrarily chunked byte stream into discrete [`Frame`]s.
//! - **Codec** ([`codec`]): decodes a frame into a typed
//!   [`ProtocolEvent`], and encodes client commands (`CONNECT`, `PUB`,
//!   `SUB`, `UNSUB`, `PING`, `PONG`) into write-ready byte buffers.
//! - **Types** ([`ServerInfo`], [`ConnectOptions`], [`IncomingMessage`]):
//!   the structures that travel inside frames.
//! - **Errors** ([`ProtocolError`]): what can go wrong while encoding or
//!   decoding.
//!
//! # Architecture
//!
//! The protocol layer is pure transformation: it performs no I/O and knows
//! nothing about connections or subscriptions:
//!
//! ```text
//! Transport (bytes) → FrameParser (Frame) → codec::decode (ProtocolEvent)
//! application command → codec::encode → Connection write (bytes)
//! ```

mod error;
pub mod codec;
mod parser;
mod types;

pub use error::ProtocolError;
pub use parser::{Frame, FrameParser};
pub use types::{ConnectOptions, IncomingMessage, ProtocolEvent, ServerInfo};
