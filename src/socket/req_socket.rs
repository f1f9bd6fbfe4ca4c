// src/socket/req_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::patterns::{FairQueue, LoadBalancer};
use crate::socket::ISocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReqState {
  ReadyToSend,
  SendingRequest,
  AwaitingReply,
  ReceivingReply,
}

/// REQ: strict send/recv alternation. An empty delimiter frame is
/// prepended to requests and stripped from replies.
pub(crate) struct ReqSocket {
  load_balancer: LoadBalancer,
  fair_queue: FairQueue,
  state: ReqState,
  current_out: Option<ObjectId>,
  /// Inside the reply: the delimiter was stripped, body frames pass.
  reply_body: bool,
}

impl ReqSocket {
  pub fn new() -> Self {
    Self {
      load_balancer: LoadBalancer::new(),
      fair_queue: FairQueue::new(),
      state: ReqState::ReadyToSend,
      current_out: None,
      reply_body: false,
    }
  }
}

impl ISocket for ReqSocket {
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
    match self.state {
      ReqState::ReadyToSend | ReqState::SendingRequest => {}
      _ => return Err(ZmqError::InvalidState("REQ must receive the reply first")),
    }

    let more = msg.is_more();
    let pipe_id = match self.current_out {
      Some(pipe_id) => pipe_id,
      None => {
        // Start of a request: pick a peer and lead with the delimiter.
        let Some(pipe_id) = self.load_balancer.select_writable(pipes) else {
          return Err(ZmqError::ResourceLimitReached);
        };
        let mut delimiter = Msg::new();
        delimiter.set_flags(MsgFlags::MORE);
        let Some(pipe) = pipes.get_mut(pipe_id) else {
          return Err(ZmqError::ResourceLimitReached);
        };
        if pipe.write(delimiter).is_err() {
          return Err(ZmqError::ResourceLimitReached);
        }
        self.current_out = Some(pipe_id);
        self.state = ReqState::SendingRequest;
        pipe_id
      }
    };

    let Some(pipe) = pipes.get_mut(pipe_id) else {
      self.current_out = None;
      self.state = ReqState::ReadyToSend;
      return Err(ZmqError::ResourceLimitReached);
    };
    if pipe.write(msg).is_err() {
      return Err(ZmqError::ResourceLimitReached);
    }
    if !more {
      pipe.flush();
      self.current_out = None;
      self.state = ReqState::AwaitingReply;
    }
    Ok(())
  }

  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    match self.state {
      ReqState::AwaitingReply | ReqState::ReceivingReply => {}
      _ => return Err(ZmqError::InvalidState("REQ must send a request first")),
    }

    loop {
      let Some((_pipe_id, msg)) = self.fair_queue.recv(pipes) else {
        return Err(ZmqError::ResourceLimitReached);
      };

      if self.reply_body {
        if !msg.is_more() {
          self.reply_body = false;
          self.state = ReqState::ReadyToSend;
        } else {
          self.state = ReqState::ReceivingReply;
        }
        return Ok(msg);
      }

      // Expect the empty delimiter; anything else is a stray message from
      // an earlier, abandoned exchange and is discarded.
      if msg.size() == 0 && msg.is_more() {
        self.reply_body = true;
        self.state = ReqState::ReceivingReply;
        continue;
      }
      tracing::trace!("REQ discarding bogus reply frame");
      // Skip the rest of the bogus message.
      if msg.is_more() {
        while let Some((_p, skipped)) = self.fair_queue.recv(pipes) {
          if !skipped.is_more() {
            break;
          }
        }
      }
    }
  }
}
