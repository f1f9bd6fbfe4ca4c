// src/socket/rep_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::router_socket::RouterSocket;
use crate::socket::ISocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepState {
  Receiving,
  Sending,
}

/// REP: strict recv/send alternation built on ROUTER routing. The request
/// envelope (identity frames up to and including the empty delimiter) is
/// captured on receive and replayed in front of the reply.
pub(crate) struct RepSocket {
  router: RouterSocket,
  state: RepState,
  envelope: Vec<Msg>,
  /// Body frames of the current request still being handed to the app.
  request_body: bool,
  /// Reply frames already sent (the envelope goes out with the first).
  reply_started: bool,
}

impl RepSocket {
  pub fn new() -> Self {
    Self {
      router: RouterSocket::new(),
      state: RepState::Receiving,
      envelope: Vec::new(),
      request_body: false,
      reply_started: false,
    }
  }
}

impl ISocket for RepSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, peer_identity: Option<Blob>) {
    self.router.attach_pipe(pipe_id, peer_identity);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    self.router.pipe_detached(pipe_id);
  }

  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    if self.state != RepState::Receiving {
      return Err(ZmqError::InvalidState("REP must send the reply first"));
    }

    loop {
      let msg = self.router.xrecv(pipes)?;

      if self.request_body {
        if !msg.is_more() {
          self.request_body = false;
          self.state = RepState::Sending;
        }
        return Ok(msg);
      }

      // Collecting the envelope: identity frames, then the delimiter.
      if msg.size() == 0 && msg.is_more() {
        self.envelope.push(msg);
        self.request_body = true;
        continue;
      }
      if !msg.is_more() {
        // Malformed request (no delimiter); drop what we collected.
        tracing::trace!("REP discarding request without delimiter");
        self.envelope.clear();
        continue;
      }
      self.envelope.push(msg);
    }
  }

  fn xsend(&mut self, pipes: &mut PipeSet, msg: Msg) -> Result<(), ZmqError> {
    if self.state != RepState::Sending {
      return Err(ZmqError::InvalidState("REP must receive a request first"));
    }

    if !self.reply_started {
      // Replay the stored envelope in front of the first reply frame.
      for envelope_msg in self.envelope.drain(..) {
        self.router.xsend(pipes, envelope_msg)?;
      }
      self.reply_started = true;
    }

    let more = msg.is_more();
    self.router.xsend(pipes, msg)?;
    if !more {
      self.reply_started = false;
      self.state = RepState::Receiving;
    }
    Ok(())
  }
}
