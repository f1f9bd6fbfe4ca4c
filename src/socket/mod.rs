// src/socket/mod.rs

//! The user-facing socket layer: the `Socket` handle, the per-pattern
//! logic behind the `ISocket` trait, and the option store.

pub(crate) mod core;
pub mod options;
pub(crate) mod patterns;
pub mod types;

mod dealer_socket;
mod pair_socket;
mod pub_socket;
mod pull_socket;
mod push_socket;
mod rep_socket;
mod req_socket;
mod router_socket;
mod sub_socket;

pub use types::SocketType;

use crate::context::Context;
use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::{PipeSet, SocketCore};

/// The pattern half of a socket: what PUSH, SUB, ROUTER and friends each
/// do differently. The core calls in with the pipe set; implementations
/// keep only routing state of their own.
pub(crate) trait ISocket: Send {
  /// A new pipe is attached (connection established or inproc connect).
  fn attach_pipe(&mut self, pipe_id: ObjectId, peer_identity: Option<Blob>);

  /// The pipe is gone (peer closed, connection dropped permanently).
  fn pipe_detached(&mut self, pipe_id: ObjectId);

  /// Pattern-specific send. `ResourceLimitReached` means "try again once a
  /// peer can take it" and leaves the pattern state unchanged.
  fn xsend(&mut self, pipes: &mut PipeSet, msg: Msg) -> Result<(), ZmqError>;

  /// Pattern-specific receive; `ResourceLimitReached` means nothing is
  /// available right now.
  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError>;

  /// A pipe the pattern may have given up on became readable again.
  fn read_activated(&mut self, _pipe_id: ObjectId) {}

  /// A pipe that refused a write has space again.
  fn write_activated(&mut self, _pipe_id: ObjectId) {}

  /// Pattern-level options (SUBSCRIBE and friends).
  fn set_pattern_option(&mut self, option: i32, _value: &[u8]) -> Result<(), ZmqError> {
    Err(ZmqError::UnsupportedOption(option))
  }
}

pub(crate) fn make_socket_logic(socket_type: SocketType) -> Box<dyn ISocket> {
  match socket_type {
    SocketType::Pair => Box::new(pair_socket::PairSocket::new()),
    SocketType::Pub => Box::new(pub_socket::PubSocket::new()),
    SocketType::Sub => Box::new(sub_socket::SubSocket::new()),
    SocketType::Req => Box::new(req_socket::ReqSocket::new()),
    SocketType::Rep => Box::new(rep_socket::RepSocket::new()),
    SocketType::Dealer => Box::new(dealer_socket::DealerSocket::new()),
    SocketType::Router => Box::new(router_socket::RouterSocket::new()),
    SocketType::Pull => Box::new(pull_socket::PullSocket::new()),
    SocketType::Push => Box::new(push_socket::PushSocket::new()),
  }
}

/// A messaging socket. Not thread-safe: one thread drives it at a time,
/// but it can be moved freely between threads.
pub struct Socket {
  core: SocketCore,
}

impl Socket {
  pub(crate) fn with_core(core: SocketCore) -> Self {
    Self { core }
  }

  /// Binds to an endpoint (`tcp://host:port` or `inproc://name`). Binding
  /// `tcp://...:0` picks a free port; see [`Socket::last_endpoint`].
  pub fn bind(&mut self, endpoint: &str) -> Result<(), ZmqError> {
    self.core.bind(endpoint)
  }

  /// Connects to an endpoint. TCP connects are asynchronous and retried
  /// with backoff until the peer appears.
  pub fn connect(&mut self, endpoint: &str) -> Result<(), ZmqError> {
    self.core.connect(endpoint)
  }

  /// Sends one message frame, honouring `SNDTIMEO`. Set `MsgFlags::MORE`
  /// to continue a multipart message.
  pub fn send(&mut self, msg: Msg) -> Result<(), ZmqError> {
    self.core.send(msg)
  }

  /// Receives one message frame, honouring `RCVTIMEO`. Check
  /// `Msg::is_more` for continuation frames.
  pub fn recv(&mut self) -> Result<Msg, ZmqError> {
    self.core.recv()
  }

  /// Stops listening on a bound endpoint. Existing connections accepted
  /// through it close abruptly.
  pub fn unbind(&mut self, endpoint: &str) -> Result<(), ZmqError> {
    self.core.unplug_endpoint(endpoint)
  }

  /// Drops a connected endpoint and its connection.
  pub fn disconnect(&mut self, endpoint: &str) -> Result<(), ZmqError> {
    self.core.unplug_endpoint(endpoint)
  }

  pub fn set_option(&mut self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.core.set_option(option, value)
  }

  /// Convenience for the common integer-valued options.
  pub fn set_option_int(&mut self, option: i32, value: i32) -> Result<(), ZmqError> {
    self.core.set_option(option, &value.to_ne_bytes())
  }

  /// The last endpoint bound, with wildcards resolved.
  pub fn last_endpoint(&self) -> Option<String> {
    self.core.last_endpoint().map(str::to_string)
  }

  /// Closes the socket, honouring `LINGER` for undelivered messages.
  pub fn close(&mut self) -> Result<(), ZmqError> {
    self.core.close()
  }
}

impl Drop for Socket {
  fn drop(&mut self) {
    if let Err(e) = self.core.close() {
      tracing::warn!(error = %e, "socket close failed during drop");
    }
  }
}

pub(crate) fn create_socket(context: Context, socket_type: SocketType) -> Result<Socket, ZmqError> {
  let logic = make_socket_logic(socket_type);
  let core = SocketCore::new(context, socket_type, logic)?;
  Ok(Socket::with_core(core))
}
