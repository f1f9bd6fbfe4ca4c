// src/socket/router_socket.rs

use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use crate::socket::patterns::FairQueue;
use crate::socket::ISocket;
use std::collections::{HashMap, VecDeque};

/// ROUTER: prefixes received messages with the sending peer's identity and
/// routes sent messages by a leading identity frame. An unroutable message
/// is silently dropped.
#[derive(Default)]
pub(crate) struct RouterSocket {
  fair_queue: FairQueue,
  identity_to_pipe: HashMap<Blob, ObjectId>,
  pipe_to_identity: HashMap<ObjectId, Blob>,
  /// Identities generated for peers that announced none.
  next_generated: u32,

  /// Receive side: frames queued behind a synthesized identity frame.
  pending_in: VecDeque<Msg>,
  /// Continuation frames of the current inbound message pass straight
  /// through without another identity prefix.
  recv_more: bool,

  /// Send side: destination of the current outbound message.
  current_out: Option<ObjectId>,
  /// The rest of the current outbound message is being discarded.
  dropping_out: bool,
}

impl RouterSocket {
  pub fn new() -> Self {
    Self::default()
  }

  fn generate_identity(&mut self) -> Blob {
    // The reference tags generated identities with a leading zero byte so
    // they cannot collide with application-chosen ones.
    self.next_generated = self.next_generated.wrapping_add(1);
    let mut raw = vec![0u8];
    raw.extend_from_slice(&self.next_generated.to_be_bytes());
    Blob::from(raw)
  }
}

impl ISocket for RouterSocket {
  fn attach_pipe(&mut self, pipe_id: ObjectId, peer_identity: Option<Blob>) {
    let identity = match peer_identity {
      Some(identity) if !self.identity_to_pipe.contains_key(&identity) => identity,
      Some(identity) => {
        tracing::warn!(pipe = pipe_id, ?identity, "duplicate peer identity; generating one");
        self.generate_identity()
      }
      None => self.generate_identity(),
    };
    self.identity_to_pipe.insert(identity.clone(), pipe_id);
    self.pipe_to_identity.insert(pipe_id, identity);
    self.fair_queue.add_pipe(pipe_id);
  }

  fn pipe_detached(&mut self, pipe_id: ObjectId) {
    self.fair_queue.remove_pipe(pipe_id);
    if let Some(identity) = self.pipe_to_identity.remove(&pipe_id) {
      self.identity_to_pipe.remove(&identity);
    }
    if self.current_out == Some(pipe_id) {
      self.current_out = None;
      self.dropping_out = true;
    }
  }

  fn xsend(&mut self, pipes: &mut PipeSet, msg: Msg) -> Result<(), ZmqError> {
    let more = msg.is_more();

    if self.dropping_out {
      if !more {
        self.dropping_out = false;
      }
      return Ok(());
    }

    match self.current_out {
      None => {
        // First frame: the destination identity, consumed here.
        if !more {
          // An identity with nothing behind it routes nowhere.
          return Ok(());
        }
        let identity = Blob::from(msg.data().unwrap_or(&[]).to_vec());
        match self.identity_to_pipe.get(&identity) {
          Some(&pipe_id) if pipes.get(pipe_id).is_some_and(|pipe| pipe.check_write()) => {
            self.current_out = Some(pipe_id);
          }
          _ => {
            // Unknown peer or full pipe: the whole message is dropped.
            tracing::trace!(?identity, "unroutable message dropped");
            self.dropping_out = true;
          }
        }
        Ok(())
      }
      Some(pipe_id) => {
        let Some(pipe) = pipes.get_mut(pipe_id) else {
          self.current_out = None;
          self.dropping_out = more;
          return Ok(());
        };
        if let Err(_refused) = pipe.write(msg) {
          self.current_out = None;
          self.dropping_out = more;
          return Ok(());
        }
        if !more {
          pipe.flush();
          self.current_out = None;
        }
        Ok(())
      }
    }
  }

  fn xrecv(&mut self, pipes: &mut PipeSet) -> Result<Msg, ZmqError> {
    if let Some(msg) = self.pending_in.pop_front() {
      return Ok(msg);
    }

    let Some((pipe_id, msg)) = self.fair_queue.recv(pipes) else {
      return Err(ZmqError::ResourceLimitReached);
    };

    if self.recv_more {
      self.recv_more = msg.is_more();
      return Ok(msg);
    }

    // New logical message: synthesize the identity frame in front of it.
    let identity = self
      .pipe_to_identity
      .get(&pipe_id)
      .cloned()
      .unwrap_or_default();
    let mut identity_msg = Msg::from_vec(identity.as_bytes().to_vec());
    identity_msg.set_flags(MsgFlags::MORE);

    self.recv_more = msg.is_more();
    self.pending_in.push_back(msg);
    Ok(identity_msg)
  }
}
