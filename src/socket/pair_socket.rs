// src/socket/pair_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::ISocket;

/// PAIR: an exclusive one-to-one channel over a single pipe.
#[derive(Default)]
pub(crate) struct PairSocket {
  pipe: Option<ObjectId>,
}

impl PairSocket {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ISocket for PairSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, _peer_identity: Option<Blob>) {
    if self.pipe.is_some() {
      tracing::warn!(pipe = pipe_id, "PAIR already has a peer; extra pipe ignored");
      return;
    }
    self.pipe = Some(pipe_id);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    if self.pipe == Some(pipe_id) {
      self.pipe = None;
    }
  }

  fn xsend(&mut self, pipes: &mut PipeSet, msg: Msg) -> Result<(), ZmqError> {
    let Some(pipe) = self.pipe.and_then(|id| pipes.get_mut(id)) else {
      return Err(ZmqError::ResourceLimitReached);
    };
    let more = msg.is_more();
    if pipe.write(msg).is_err() {
      return Err(ZmqError::ResourceLimitReached);
    }
    if !more {
      pipe.flush();
    }
    Ok(())
  }

  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    let msg = self
      .pipe
      .and_then(|id| pipes.get_mut(id))
      .and_then(|pipe| pipe.read());
    msg.ok_or(ZmqError::ResourceLimitReached)
  }
}
