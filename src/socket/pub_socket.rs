// src/socket/pub_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::patterns::Distributor;
use crate::socket::ISocket;

/// PUB: fans every message out to all subscribers. A subscriber above its
/// high-water-mark misses messages rather than slowing the publisher.
#[derive(Default)]
pub(crate) struct PubSocket {
  distributor: Distributor,
}

impl PubSocket {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ISocket for PubSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, _peer_identity: Option<Blob>) {
    self.distributor.add_pipe(pipe_id);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    self.distributor.remove_pipe(pipe_id);
  }

  fn xsend(&mut self, pipes: &mut PipeSet, msg: Msg) -> Result<(), ZmqError> {
    self.distributor.send_to_all(pipes, &msg);
    Ok(())
  }

  fn xrecv(&mut self, _pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    Err(ZmqError::InvalidSocketType("PUB cannot receive"))
  }
}
