// src/socket/patterns/fair_queue.rs

use crate::message::Msg;
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use std::collections::VecDeque;

/// Receives from attached pipes in a round-robin fashion, pinning a
/// multipart message to the pipe it started on.
#[derive(Debug, Default)]
pub(crate) struct FairQueue {
  pipes: VecDeque<ObjectId>,
  /// A multipart message is in flight from this pipe; its remaining frames
  /// take priority over rotation.
  current_in: Option<ObjectId>,
}

impl FairQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_pipe(&mut self, pipe_id: ObjectId) {
    if !self.pipes.contains(&pipe_id) {
      self.pipes.push_back(pipe_id);
      tracing::trace!(pipe = pipe_id, "fair queue added pipe");
    }
  }

  pub fn remove_pipe(&mut self, pipe_id: ObjectId) {
    if let Some(pos) = self.pipes.iter().position(|&id| id == pipe_id) {
      self.pipes.remove(pos);
    }
    if self.current_in == Some(pipe_id) {
      self.current_in = None;
    }
  }

  /// Pops the next frame together with the pipe it came from.
  pub fn recv(&mut self, pipes: &mut PipeSet) -> Option<(ObjectId, Msg)> {
    if let Some(pinned) = self.current_in {
      // The rest of the multipart message must come from the same pipe;
      // nothing else is eligible until it completes.
      let msg = pipes.get_mut(pinned)?.read()?;
      if !msg.is_more() {
        self.current_in = None;
      }
      return Some((pinned, msg));
    }

    for _ in 0..self.pipes.len() {
      let candidate = self.pipes.pop_front()?;
      self.pipes.push_back(candidate);
      let Some(pipe) = pipes.get_mut(candidate) else {
        continue;
      };
      if let Some(msg) = pipe.read() {
        if msg.is_more() {
          self.current_in = Some(candidate);
        }
        return Some((candidate, msg));
      }
    }
    None
  }

  pub fn has_pipes(&self) -> bool {
    !self.pipes.is_empty()
  }
}
