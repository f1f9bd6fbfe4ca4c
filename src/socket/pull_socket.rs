// src/socket/pull_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::patterns::FairQueue;
use crate::socket::ISocket;

/// PULL: fair-queues incoming messages from connected peers; never sends.
#[derive(Default)]
pub(crate) struct PullSocket {
  fair_queue: FairQueue,
}

impl PullSocket {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ISocket for PullSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, _peer_identity: Option<Blob>) {
    self.fair_queue.add_pipe(pipe_id);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    self.fair_queue.remove_pipe(pipe_id);
  }

  fn xsend(&mut self, _pipes: &mut PipeSet, _msg: Msg) -> Result<(), ZmqError> {
    Err(ZmqError::InvalidSocketType("PULL cannot send"))
  }

  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    match self.fair_queue.recv(pipes) {
      Some((_pipe_id, msg)) => Ok(msg),
      None => Err(ZmqError::ResourceLimitReached),
    }
  }
}
