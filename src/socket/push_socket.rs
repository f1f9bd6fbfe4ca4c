// src/socket/push_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::patterns::LoadBalancer;
use crate::socket::ISocket;

/// PUSH: round-robins outgoing messages over connected peers; never
/// receives.
#[derive(Default)]
pub(crate) struct PushSocket {
  load_balancer: LoadBalancer,
  /// Pipe carrying the current multipart message.
  current_out: Option<ObjectId>,
}

impl PushSocket {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ISocket for PushSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, _peer_identity: Option<Blob>) {
    self.load_balancer.add_pipe(pipe_id);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    self.load_balancer.remove_pipe(pipe_id);
    if self.current_out == Some(pipe_id) {
      self.current_out = None;
    }
  }

  fn xsend(&mut self, pipes: &mut PipeSet, msg: Msg) -> Result<(), ZmqError> {
    let more = msg.is_more();

    let pipe_id = match self.current_out {
      Some(pipe_id) => pipe_id,
      None => match self.load_balancer.select_writable(pipes) {
        Some(pipe_id) => pipe_id,
        None => return Err(ZmqError::ResourceLimitReached),
      },
    };

    let Some(pipe) = pipes.get_mut(pipe_id) else {
      // The chosen pipe died mid-message; the rest of this message has
      // nowhere meaningful to go.
      self.current_out = None;
      return Err(ZmqError::ResourceLimitReached);
    };
    if pipe.write(msg).is_err() {
      return Err(ZmqError::ResourceLimitReached);
    }
    if more {
      self.current_out = Some(pipe_id);
    } else {
      pipe.flush();
      self.current_out = None;
    }
    Ok(())
  }

  fn xrecv(&mut self, _pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    Err(ZmqError::InvalidSocketType("PUSH cannot receive"))
  }
}
