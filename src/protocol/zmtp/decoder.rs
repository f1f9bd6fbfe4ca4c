// src/protocol/zmtp/decoder.rs

//! The frame decoder: a size-prefix state machine turning raw transport
//! bytes into whole messages.
//!
//! The engine asks for a fill buffer with [`ZmtpDecoder::get_buffer`],
//! reads from the transport into it, then feeds the byte count through
//! [`ZmtpDecoder::process_buffer`]. Small frames coalesce through an
//! internal scratch buffer (allocated once); a frame step that still needs
//! at least the scratch size is filled directly into the message payload,
//! so large frames are never copied.

use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags};
use crate::protocol::zmtp::{ZMTP_FLAG_COMMAND, ZMTP_FLAG_LONG, ZMTP_FLAG_MASK, ZMTP_FLAG_MORE};
use bytes::Bytes;

/// Where decoded messages go. A refusal (`Err` returns the message intact)
/// means the downstream queue is full; the decoder retains the message and
/// reports itself stalled.
pub(crate) trait MsgSink {
  fn push_msg(&mut self, msg: Msg) -> Result<(), Msg>;
}

/// One tag per step; `step` names the bytes that just became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderStep {
  FlagsReady,
  OneByteSizeReady,
  EightByteSizeReady,
  MessageReady,
  /// Latched on protocol error; every later call fails.
  Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
  Tmp,
  Body,
}

pub(crate) struct ZmtpDecoder {
  /// Coalescing buffer for small frames. Allocated exactly once.
  scratch: Vec<u8>,
  /// Header bytes land here (at most eight at a time).
  tmpbuf: [u8; 8],
  step: DecoderStep,
  target: Target,
  read_pos: usize,
  to_read: usize,
  /// Whether the last `get_buffer` handed out the message payload itself.
  zero_copy: bool,
  in_progress: Vec<u8>,
  frame_flags: MsgFlags,
  /// Completed message the sink refused; retried before any new bytes.
  pending: Option<Msg>,
  max_msg_size: Option<u64>,
}

impl ZmtpDecoder {
  pub fn new(scratch_size: usize, max_msg_size: Option<u64>) -> Self {
    let mut decoder = Self {
      scratch: vec![0; scratch_size],
      tmpbuf: [0; 8],
      step: DecoderStep::FlagsReady,
      target: Target::Tmp,
      read_pos: 0,
      to_read: 0,
      zero_copy: false,
      in_progress: Vec::new(),
      frame_flags: MsgFlags::empty(),
      pending: None,
      max_msg_size,
    };
    decoder.next_step_tmp(1, DecoderStep::FlagsReady);
    decoder
  }

  fn next_step_tmp(&mut self, to_read: usize, step: DecoderStep) {
    self.target = Target::Tmp;
    self.read_pos = 0;
    self.to_read = to_read;
    self.step = step;
  }

  fn next_step_body(&mut self, size: usize) {
    self.in_progress = vec![0; size];
    self.target = Target::Body;
    self.read_pos = 0;
    self.to_read = size;
    self.step = DecoderStep::MessageReady;
  }

  fn dead(&mut self, reason: String) -> ZmqError {
    self.step = DecoderStep::Dead;
    ZmqError::ProtocolViolation(reason)
  }

  /// True while a completed message awaits downstream space. The engine
  /// must stall input until `process_buffer` is retried successfully.
  pub fn stalled(&self) -> bool {
    self.pending.is_some()
  }

  /// Returns the buffer the transport should read into next: the internal
  /// scratch, or the message payload tail for a large frame (zero-copy).
  pub fn get_buffer(&mut self) -> &mut [u8] {
    if self.to_read >= self.scratch.len() && self.target == Target::Body {
      self.zero_copy = true;
      let start = self.read_pos;
      let end = self.read_pos + self.to_read;
      &mut self.in_progress[start..end]
    } else {
      self.zero_copy = false;
      &mut self.scratch[..]
    }
  }

  /// Consumes `size` bytes previously read into the `get_buffer` result
  /// (at `offset` within the scratch, for the coalescing path) and drives
  /// the state machine, delivering completed messages to `sink`.
  ///
  /// Returns the number of source bytes consumed; fewer than `size` means
  /// the sink refused a message. A protocol error latches the dead state
  /// and every subsequent call fails.
  pub fn process_buffer(
    &mut self,
    offset: usize,
    size: usize,
    sink: &mut dyn MsgSink,
  ) -> Result<usize, ZmqError> {
    if self.step == DecoderStep::Dead {
      return Err(ZmqError::ProtocolViolation("decoder is in dead state".into()));
    }

    // A previously refused message blocks everything behind it.
    if let Some(msg) = self.pending.take() {
      match sink.push_msg(msg) {
        Ok(()) => self.next_step_tmp(1, DecoderStep::FlagsReady),
        Err(msg) => {
          self.pending = Some(msg);
          return Ok(0);
        }
      }
    }

    // Zero-copy: the bytes are already in place, only advance the
    // counters and run the machine if the step completed.
    if self.zero_copy {
      self.read_pos += size;
      self.to_read -= size;
      while self.to_read == 0 {
        if !self.next(sink)? {
          return Ok(size);
        }
      }
      return Ok(size);
    }

    let mut pos = 0;
    loop {
      while self.to_read == 0 {
        if !self.next(sink)? {
          return Ok(pos);
        }
      }
      if pos == size {
        return Ok(pos);
      }

      let to_copy = self.to_read.min(size - pos);
      let src = offset + pos;
      match self.target {
        Target::Tmp => self.tmpbuf[self.read_pos..self.read_pos + to_copy]
          .copy_from_slice(&self.scratch[src..src + to_copy]),
        Target::Body => self.in_progress[self.read_pos..self.read_pos + to_copy]
          .copy_from_slice(&self.scratch[src..src + to_copy]),
      }
      self.read_pos += to_copy;
      self.to_read -= to_copy;
      pos += to_copy;
    }
  }

  /// Executes the action for the bytes that just completed. `Ok(false)`
  /// means the sink refused the message and the machine must not advance.
  fn next(&mut self, sink: &mut dyn MsgSink) -> Result<bool, ZmqError> {
    match self.step {
      DecoderStep::FlagsReady => {
        let flags = self.tmpbuf[0];
        if flags & !ZMTP_FLAG_MASK != 0 {
          return Err(self.dead(format!("invalid frame flags {:#04x}", flags)));
        }
        let mut frame_flags = MsgFlags::empty();
        if flags & ZMTP_FLAG_MORE != 0 {
          frame_flags |= MsgFlags::MORE;
        }
        if flags & ZMTP_FLAG_COMMAND != 0 {
          frame_flags |= MsgFlags::COMMAND;
        }
        self.frame_flags = frame_flags;
        if flags & ZMTP_FLAG_LONG != 0 {
          self.next_step_tmp(8, DecoderStep::EightByteSizeReady);
        } else {
          self.next_step_tmp(1, DecoderStep::OneByteSizeReady);
        }
        Ok(true)
      }

      DecoderStep::OneByteSizeReady => {
        let size = self.tmpbuf[0] as u64;
        self.begin_body(size)?;
        Ok(true)
      }

      DecoderStep::EightByteSizeReady => {
        let size = u64::from_be_bytes(self.tmpbuf);
        self.begin_body(size)?;
        Ok(true)
      }

      DecoderStep::MessageReady => {
        let payload = std::mem::take(&mut self.in_progress);
        let mut msg = Msg::from_bytes(Bytes::from(payload));
        msg.set_flags(self.frame_flags);
        match sink.push_msg(msg) {
          Ok(()) => {
            self.next_step_tmp(1, DecoderStep::FlagsReady);
            Ok(true)
          }
          Err(msg) => {
            self.pending = Some(msg);
            Ok(false)
          }
        }
      }

      DecoderStep::Dead => Err(ZmqError::ProtocolViolation("decoder is in dead state".into())),
    }
  }

  fn begin_body(&mut self, size: u64) -> Result<(), ZmqError> {
    if let Some(max) = self.max_msg_size {
      if size > max {
        return Err(self.dead(format!("frame of {} bytes exceeds max message size {}", size, max)));
      }
    }
    if size > usize::MAX as u64 {
      return Err(self.dead(format!("frame of {} bytes is unrepresentable", size)));
    }
    self.next_step_body(size as usize);
    Ok(())
  }
}

impl std::fmt::Debug for ZmtpDecoder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ZmtpDecoder")
      .field("step", &self.step)
      .field("to_read", &self.to_read)
      .field("stalled", &self.stalled())
      .finish()
  }
}
