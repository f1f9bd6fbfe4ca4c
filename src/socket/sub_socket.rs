// src/socket/sub_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::options::{SUBSCRIBE, UNSUBSCRIBE};
use crate::socket::patterns::{FairQueue, SubscriptionTrie};
use crate::socket::ISocket;

/// SUB: fair-queues from publishers and filters on subscribed prefixes.
/// The first frame of a logical message is the topic; a non-matching
/// message is discarded whole.
#[derive(Default)]
pub(crate) struct SubSocket {
  fair_queue: FairQueue,
  subscriptions: SubscriptionTrie,
  /// Remaining frames of an accepted message pass through unfiltered.
  passing_more: bool,
  /// Remaining frames of a rejected message are being discarded.
  discarding: bool,
}

impl SubSocket {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ISocket for SubSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, _peer_identity: Option<Blob>) {
    self.fair_queue.add_pipe(pipe_id);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    self.fair_queue.remove_pipe(pipe_id);
  }

  fn xsend(&mut self, _pipes: &mut PipeSet, _msg: Msg) -> Result<(), ZmqError> {
    Err(ZmqError::InvalidSocketType("SUB cannot send"))
  }

  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    loop {
      let Some((_pipe_id, msg)) = self.fair_queue.recv(pipes) else {
        return Err(ZmqError::ResourceLimitReached);
      };

      if self.passing_more {
        self.passing_more = msg.is_more();
        return Ok(msg);
      }
      if self.discarding {
        self.discarding = msg.is_more();
        continue;
      }

      // First frame of a logical message: the topic decides its fate.
      let topic = msg.data().unwrap_or(&[]);
      if self.subscriptions.matches(topic) {
        self.passing_more = msg.is_more();
        return Ok(msg);
      }
      self.discarding = msg.is_more();
    }
  }

  fn set_pattern_option(&mut self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    match option {
      SUBSCRIBE => {
        self.subscriptions.subscribe(value);
        Ok(())
      }
      UNSUBSCRIBE => {
        self.subscriptions.unsubscribe(value);
        Ok(())
      }
      _ => Err(ZmqError::UnsupportedOption(option)),
    }
  }
}
