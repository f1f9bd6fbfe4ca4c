// src/protocol/zmtp/encoder.rs

//! The frame encoder: accepts whole messages and emits raw transport
//! bytes.
//!
//! Small frames are coalesced — header and payload appended to a scratch
//! batch so many frames go out in one write. A payload at least as large
//! as the batch is handed to the write loop as the message's own
//! refcounted buffer (zero-copy); its header travels with the preceding
//! batch.

use crate::message::{Msg, MsgFlags};
use crate::protocol::zmtp::{ZMTP_FLAG_COMMAND, ZMTP_FLAG_LONG, ZMTP_FLAG_MORE};
use bytes::Bytes;

/// Where the encoder pulls messages from. `None` means the upstream queue
/// is empty and the engine should stall output until `restart_output`.
pub(crate) trait MsgSource {
  fn pull_msg(&mut self) -> Option<Msg>;
}

/// Largest frame header: one flags byte plus an eight-byte length.
const MAX_HEADER_SIZE: usize = 9;

pub(crate) struct ZmtpEncoder {
  batch_size: usize,
  /// Coalescing buffer; `scratch_pos` tracks how much of it was written
  /// out already.
  scratch: Vec<u8>,
  scratch_pos: usize,
  /// Zero-copy chunk being written out, with its own progress cursor.
  direct: Option<(Bytes, usize)>,
  /// Remainder of the current frame's payload not yet emitted.
  in_progress: Option<Bytes>,
}

impl ZmtpEncoder {
  pub fn new(batch_size: usize) -> Self {
    Self {
      batch_size,
      scratch: Vec::with_capacity(batch_size),
      scratch_pos: 0,
      direct: None,
      in_progress: None,
    }
  }

  /// True when there are no bytes waiting to be written.
  pub fn is_empty(&self) -> bool {
    self.direct.is_none() && self.scratch_pos >= self.scratch.len()
  }

  /// True when no bytes wait to be written and no frame is half-emitted.
  /// The session's drain logic uses this to decide a connection is flushed.
  pub fn idle(&self) -> bool {
    self.is_empty() && self.in_progress.is_none()
  }

  /// Prepares the next chunk of wire bytes, pulling messages from `source`
  /// as needed. Returns false when there is nothing to send (the source is
  /// empty and no partial frame remains buffered).
  pub fn load(&mut self, source: &mut dyn MsgSource) -> bool {
    if !self.is_empty() {
      return true;
    }
    self.scratch.clear();
    self.scratch_pos = 0;

    loop {
      if let Some(payload) = self.in_progress.take() {
        // A large payload goes out as-is, but only at a chunk boundary so
        // byte order on the wire is preserved.
        if self.scratch.is_empty() && payload.len() >= self.batch_size {
          self.direct = Some((payload, 0));
          return true;
        }
        let room = self.batch_size - self.scratch.len();
        if payload.len() <= room {
          self.scratch.extend_from_slice(&payload);
        } else {
          self.scratch.extend_from_slice(&payload[..room]);
          self.in_progress = Some(payload.slice(room..));
          return true;
        }
        continue;
      }

      if self.scratch.len() + MAX_HEADER_SIZE > self.batch_size {
        return true;
      }
      match source.pull_msg() {
        None => return !self.scratch.is_empty(),
        Some(msg) => {
          self.put_header(&msg);
          if msg.size() > 0 {
            self.in_progress = msg.data_bytes();
          }
        }
      }
    }
  }

  /// The bytes the transport should write next.
  pub fn pending(&self) -> &[u8] {
    match &self.direct {
      Some((data, pos)) => &data[*pos..],
      None => &self.scratch[self.scratch_pos..],
    }
  }

  /// Records that `n` bytes of `pending` were written.
  pub fn advance(&mut self, n: usize) {
    if let Some((data, pos)) = &mut self.direct {
      *pos += n;
      debug_assert!(*pos <= data.len());
      if *pos >= data.len() {
        self.direct = None;
      }
    } else {
      self.scratch_pos += n;
      debug_assert!(self.scratch_pos <= self.scratch.len());
    }
  }

  fn put_header(&mut self, msg: &Msg) {
    let size = msg.size();
    let flags = msg.flags();

    let mut wire_flags = 0u8;
    if flags.contains(MsgFlags::MORE) {
      wire_flags |= ZMTP_FLAG_MORE;
    }
    if flags.contains(MsgFlags::COMMAND) {
      wire_flags |= ZMTP_FLAG_COMMAND;
    }

    if size <= 255 {
      self.scratch.push(wire_flags);
      self.scratch.push(size as u8);
    } else {
      self.scratch.push(wire_flags | ZMTP_FLAG_LONG);
      self.scratch.extend_from_slice(&(size as u64).to_be_bytes());
    }
  }
}

impl std::fmt::Debug for ZmtpEncoder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ZmtpEncoder")
      .field("is_empty", &self.is_empty())
      .field("direct", &self.direct.as_ref().map(|(d, p)| d.len() - p))
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::zmtp::BATCH_SIZE;
  use std::collections::VecDeque;

  struct VecSource(VecDeque<Msg>);

  impl MsgSource for VecSource {
    fn pull_msg(&mut self) -> Option<Msg> {
      self.0.pop_front()
    }
  }

  #[test]
  fn empty_source_reports_stall() {
    let mut encoder = ZmtpEncoder::new(BATCH_SIZE);
    let mut source = VecSource(VecDeque::new());
    assert!(!encoder.load(&mut source));
    assert!(encoder.is_empty());
  }

  #[test]
  fn small_frames_coalesce_into_one_batch() {
    let mut encoder = ZmtpEncoder::new(BATCH_SIZE);
    let mut source = VecSource((0..10).map(|i| Msg::from_vec(vec![i as u8; 3])).collect());
    assert!(encoder.load(&mut source));
    // All ten frames (2-byte header + 3-byte payload each) in one chunk.
    assert_eq!(encoder.pending().len(), 10 * 5);
    let n = encoder.pending().len();
    encoder.advance(n);
    assert!(encoder.is_empty());
  }

  #[test]
  fn large_payload_takes_the_zero_copy_path() {
    let mut encoder = ZmtpEncoder::new(BATCH_SIZE);
    let payload = vec![0xCD; BATCH_SIZE * 3];
    let mut source = VecSource(vec![Msg::from_vec(payload.clone())].into());

    // First chunk: a full batch (header plus the payload head).
    assert!(encoder.load(&mut source));
    assert_eq!(encoder.pending().len(), BATCH_SIZE);
    assert_eq!(encoder.pending()[0], ZMTP_FLAG_LONG);
    let n = encoder.pending().len();
    encoder.advance(n);

    // Second chunk: the payload remainder handed out as-is, larger than
    // any batch could be.
    assert!(encoder.load(&mut source));
    let direct_len = encoder.pending().len();
    assert_eq!(direct_len, payload.len() - (BATCH_SIZE - 9));
    assert!(direct_len > BATCH_SIZE);
    assert!(encoder.pending().iter().all(|&b| b == 0xCD));
    encoder.advance(direct_len);
    assert!(encoder.is_empty());
    assert!(!encoder.load(&mut source));
  }

  #[test]
  fn partial_writes_resume_where_they_stopped() {
    let mut encoder = ZmtpEncoder::new(BATCH_SIZE);
    let mut source = VecSource(vec![Msg::from_static(b"hello world")].into());
    assert!(encoder.load(&mut source));
    let total: Vec<u8> = encoder.pending().to_vec();

    let mut written = Vec::new();
    while !encoder.is_empty() {
      let chunk = encoder.pending();
      written.push(chunk[0]);
      encoder.advance(1);
    }
    assert_eq!(written, total);
  }
}
