// src/socket/dealer_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::patterns::{FairQueue, LoadBalancer};
use crate::socket::ISocket;

/// DEALER: load-balances sends, fair-queues receives, no reply state.
#[derive(Default)]
pub(crate) struct DealerSocket {
  load_balancer: LoadBalancer,
  fair_queue: FairQueue,
  current_out: Option<ObjectId>,
}

impl DealerSocket {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ISocket for DealerSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, _peer_identity: Option<Blob>) {
    self.load_balancer.add_pipe(pipe_id);
    self.fair_queue.add_pipe(pipe_id);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    self.load_balancer.remove_pipe(pipe_id);
    self.fair_queue.remove_pipe(pipe_id);
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

  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    match self.fair_queue.recv(pipes) {
      Some((_pipe_id, msg)) => Ok(msg),
      None => Err(ZmqError::ResourceLimitReached),
    }
  }
}
