// src/socket/patterns/distributor.rs

use crate::message::Msg;
use crate::runtime::command::ObjectId;
use crate::socket::core::PipeSet;
use std::collections::HashSet;

/// Copies every message to all attached pipes. A pipe that is full when a
/// logical message starts misses that whole message; the publisher never
/// blocks.
#[derive(Debug, Default)]
pub(crate) struct Distributor {
  pipes: Vec<ObjectId>,
  /// Pipes skipping the remainder of the current multipart message.
  dropping: HashSet<ObjectId>,
  mid_message: bool,
}

impl Distributor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_pipe(&mut self, pipe_id: ObjectId) {
    if !self.pipes.contains(&pipe_id) {
      self.pipes.push(pipe_id);
      // A subscriber arriving mid-message must not see a torn tail.
      if self.mid_message {
        self.dropping.insert(pipe_id);
      }
    }
  }

  pub fn remove_pipe(&mut self, pipe_id: ObjectId) {
    self.pipes.retain(|&id| id != pipe_id);
    self.dropping.remove(&pipe_id);
  }

  /// Sends one frame to every eligible pipe. Cloning a message only bumps
  /// the payload refcount.
  pub fn send_to_all(&mut self, pipes: &mut PipeSet, msg: &Msg) {
    let last_frame = !msg.is_more();
    for &pipe_id in &self.pipes {
      if self.dropping.contains(&pipe_id) {
        continue;
      }
      let Some(pipe) = pipes.get_mut(pipe_id) else {
        continue;
      };
      if pipe.write(msg.clone()).is_err() {
        // Refusal can only happen at a message boundary; this subscriber
        // misses the whole message.
        if !last_frame {
          self.dropping.insert(pipe_id);
        }
        tracing::trace!(pipe = pipe_id, "subscriber full; message dropped");
        continue;
      }
      if last_frame {
        pipe.flush();
      }
    }
    if last_frame {
      self.dropping.clear();
      self.mid_message = false;
    } else {
      self.mid_message = true;
    }
  }
}
