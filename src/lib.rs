// src/lib.rs

//! pzmq - A pure-Rust, poll-based ZeroMQ implementation.
//!
//! This library speaks the ZeroMQ version-3 wire protocol over TCP and an
//! in-process transport, with the classic threading model: a set of reactor
//! threads runs all connection I/O, and user-thread sockets exchange
//! commands with them through signalled mailboxes.

/// Defines the `Context`, which is the entry point for creating sockets.
pub mod context;
/// Runs the per-connection byte-stream driver (greeting, framing, stalls).
pub mod engine;
/// Defines custom error types used throughout the library.
pub mod error;
/// Contains types related to message representation (Msg, Blob, flags).
pub mod message;
/// Implements the wire protocol: greeting plus the framing codec pair.
pub mod protocol;
/// Core runtime primitives: signaler, mailbox, pipes and the reactor.
pub mod runtime;
/// Manages individual connection sessions, bridging sockets and engines.
pub mod session;
/// Defines socket types, options, and the per-pattern socket logic.
pub mod socket;
/// Deals with the transport layers (TCP, inproc).
pub mod transport;

pub use context::Context;
pub use error::ZmqError;
pub use message::{Blob, Msg, MsgFlags};
pub use socket::options::{
  LINGER, MAX_MSG_SIZE, RCVHWM, RCVTIMEO, RECONNECT_IVL, RECONNECT_IVL_MAX, ROUTING_ID, SNDHWM,
  SNDTIMEO, SUBSCRIBE, UNSUBSCRIBE,
};
pub use socket::{Socket, SocketType};

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
