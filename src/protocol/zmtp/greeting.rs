use crate::error::ZmqError;
use crate::socket::types::SocketType;
use bytes::{BufMut, BytesMut};

// --- Constants ---
pub(crate) const GREETING_LENGTH: usize = 12;
const SIGNATURE_HEAD: u8 = 0xFF;
const SIGNATURE_TAIL: u8 = 0x7F;
const SIGNATURE_TAIL_OFFSET: usize = 9;
const REVISION_OFFSET: usize = 10;
const SOCKET_TYPE_OFFSET: usize = 11;

/// Protocol revision this implementation sends and expects from peers.
pub(crate) const GREETING_REVISION: u8 = 0x01;

/// The parsed content of a connection greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ZmtpGreeting {
  pub revision: u8,
  pub socket_type: SocketType,
}

impl ZmtpGreeting {
  /// Appends the canonical 12-byte greeting: signature head, an eight-byte
  /// zero length, signature tail, revision, socket type.
  pub fn encode(socket_type: SocketType, buffer: &mut BytesMut) {
    buffer.reserve(GREETING_LENGTH);
    buffer.put_u8(SIGNATURE_HEAD);
    buffer.put_bytes(0, 8);
    buffer.put_u8(SIGNATURE_TAIL);
    buffer.put_u8(GREETING_REVISION);
    buffer.put_u8(socket_type as u8);
  }

  /// Validates the bytes received so far; called as they trickle in so a
  /// non-matching peer is rejected at the first wrong byte rather than
  /// after a full greeting.
  pub fn check_partial(data: &[u8]) -> Result<(), ZmqError> {
    debug_assert!(data.len() <= GREETING_LENGTH);
    for (index, &byte) in data.iter().enumerate() {
      let ok = match index {
        0 => byte == SIGNATURE_HEAD,
        1..=8 => byte == 0,
        SIGNATURE_TAIL_OFFSET => byte == SIGNATURE_TAIL,
        _ => true,
      };
      if !ok {
        return Err(ZmqError::ProtocolViolation(format!(
          "bad greeting signature byte {:#04x} at offset {}",
          byte, index
        )));
      }
    }
    Ok(())
  }

  /// Parses a complete greeting.
  pub fn decode(data: &[u8; GREETING_LENGTH]) -> Result<Self, ZmqError> {
    Self::check_partial(data)?;

    let revision = data[REVISION_OFFSET];
    if revision != GREETING_REVISION {
      return Err(ZmqError::ProtocolViolation(format!(
        "unsupported protocol revision {:#04x}",
        revision
      )));
    }

    let socket_type = SocketType::from_wire(data[SOCKET_TYPE_OFFSET]).ok_or_else(|| {
      ZmqError::ProtocolViolation(format!(
        "unknown peer socket type {:#04x}",
        data[SOCKET_TYPE_OFFSET]
      ))
    })?;

    Ok(Self {
      revision,
      socket_type,
    })
  }
}
