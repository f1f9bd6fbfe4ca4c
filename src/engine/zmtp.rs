// src/engine/zmtp.rs

//! The per-connection engine: drives one non-blocking TCP stream, mediating
//! between raw bytes and whole messages through the decoder/encoder pair.
//!
//! Lifecycle: greeting exchange, identity exchange, then the steady-state
//! read/write loops. The engine never blocks; under edge-triggered
//! readiness both loops always run to `WouldBlock`, and a stall (downstream
//! full, upstream empty) disables the corresponding interest until the
//! session calls `restart_input`/`restart_output`.

use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::protocol::zmtp::decoder::{MsgSink, ZmtpDecoder};
use crate::protocol::zmtp::encoder::{MsgSource, ZmtpEncoder};
use crate::protocol::zmtp::greeting::{ZmtpGreeting, GREETING_LENGTH};
use crate::protocol::zmtp::BATCH_SIZE;
use crate::runtime::pipe::Pipe;
use crate::runtime::reactor::IoContext;
use crate::socket::options::SessionOptions;
use crate::socket::types::SocketType;
use bytes::BytesMut;
use mio::net::TcpStream;
use mio::Interest;
use std::io::{self, Read, Write};

/// Outcome of driving the engine once.
#[derive(Debug)]
pub(crate) enum EngineStatus {
  Ok,
  /// Handshake and identity exchange finished; the connection is usable.
  Ready { peer_identity: Option<Blob> },
  /// The peer closed the stream or the transport failed.
  Closed,
  IoError(ZmqError),
  /// Greeting or framing violation; the session must not reconnect.
  ProtocolError(ZmqError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
  Handshaking,
  Active,
  Closed,
}

pub(crate) struct ZmtpEngine {
  stream: TcpStream,
  state: EngineState,
  socket_type: SocketType,

  decoder: ZmtpDecoder,
  encoder: ZmtpEncoder,

  greeting_out: [u8; GREETING_LENGTH],
  greeting_out_pos: usize,
  greeting_in: [u8; GREETING_LENGTH],
  greeting_in_pos: usize,
  peer_greeting: Option<ZmtpGreeting>,

  /// Identity frame queued for the peer; sent first after the greeting.
  identity_out: Option<Msg>,
  /// The first inbound frame is the peer's identity, consumed in-engine.
  awaiting_identity_in: bool,
  peer_identity: Option<Blob>,
  ready_notified: bool,

  // Unprocessed remainder of the last read, living in the decoder scratch.
  in_off: usize,
  in_len: usize,

  input_stalled: bool,
  output_stalled: bool,
  want_in: bool,
  want_out: bool,
  registered: Option<Interest>,

  local_identity: Option<Blob>,
}

/// Routes decoded messages: the first frame is captured as the peer
/// identity, everything after flows into the session's pipe.
struct EngineSink<'a> {
  pipe: Option<&'a mut Pipe>,
  awaiting_identity: &'a mut bool,
  peer_identity: &'a mut Option<Blob>,
}

impl MsgSink for EngineSink<'_> {
  fn push_msg(&mut self, msg: Msg) -> Result<(), Msg> {
    if *self.awaiting_identity {
      *self.awaiting_identity = false;
      *self.peer_identity = msg
        .data()
        .filter(|data| !data.is_empty())
        .map(|data| Blob::from(data.to_vec()));
      return Ok(());
    }
    match self.pipe {
      Some(ref mut pipe) => pipe.write(msg),
      None => Err(msg),
    }
  }
}

/// Feeds the encoder: the queued identity frame first, then the pipe.
struct EngineSource<'a> {
  pipe: Option<&'a mut Pipe>,
  identity: &'a mut Option<Msg>,
}

impl MsgSource for EngineSource<'_> {
  fn pull_msg(&mut self) -> Option<Msg> {
    if let Some(msg) = self.identity.take() {
      return Some(msg);
    }
    self.pipe.as_mut()?.read()
  }
}

impl ZmtpEngine {
  pub fn new(stream: TcpStream, options: &SessionOptions) -> Self {
    let mut greeting_buf = BytesMut::with_capacity(GREETING_LENGTH);
    ZmtpGreeting::encode(options.socket_type, &mut greeting_buf);
    let mut greeting_out = [0u8; GREETING_LENGTH];
    greeting_out.copy_from_slice(&greeting_buf);

    Self {
      stream,
      state: EngineState::Handshaking,
      socket_type: options.socket_type,
      decoder: ZmtpDecoder::new(BATCH_SIZE, options.max_msg_size),
      encoder: ZmtpEncoder::new(BATCH_SIZE),
      greeting_out,
      greeting_out_pos: 0,
      greeting_in: [0u8; GREETING_LENGTH],
      greeting_in_pos: 0,
      peer_greeting: None,
      identity_out: None,
      awaiting_identity_in: false,
      peer_identity: None,
      ready_notified: false,
      in_off: 0,
      in_len: 0,
      input_stalled: false,
      output_stalled: false,
      want_in: true,
      want_out: true,
      registered: None,
      local_identity: options.routing_id.clone(),
    }
  }

  /// Registers the stream and lets edge-triggered readiness start the
  /// greeting exchange.
  pub fn plug(&mut self, ctx: &mut IoContext) {
    self.want_in = true;
    self.want_out = true;
    self.update_interest(ctx);
  }

  /// Unregisters and closes down. Safe to call on every exit path.
  pub fn terminate(&mut self, ctx: &mut IoContext) {
    if self.registered.is_some() {
      if let Err(e) = ctx.registry.deregister(&mut self.stream) {
        tracing::debug!(error = %e, "engine deregister failed");
      }
      self.registered = None;
    }
    self.state = EngineState::Closed;
  }

  /// Whether every accepted byte has been handed to the transport. Used by
  /// the session's drain logic during shutdown.
  pub fn output_idle(&self) -> bool {
    self.encoder.idle()
  }

  pub fn is_input_stalled(&self) -> bool {
    self.input_stalled
  }

  // --- Event entry points (called by the owning session) ---

  pub fn handle_readable(&mut self, pipe: Option<&mut Pipe>, ctx: &mut IoContext) -> EngineStatus {
    match self.state {
      EngineState::Closed => EngineStatus::Ok,
      EngineState::Handshaking => self.drive_handshake(pipe, ctx),
      EngineState::Active => {
        let status = self.read_loop(pipe, ctx);
        self.finish_status(status)
      }
    }
  }

  pub fn handle_writable(&mut self, pipe: Option<&mut Pipe>, ctx: &mut IoContext) -> EngineStatus {
    match self.state {
      EngineState::Closed => EngineStatus::Ok,
      EngineState::Handshaking => self.drive_handshake(pipe, ctx),
      EngineState::Active => {
        let status = self.write_loop(pipe, ctx);
        self.finish_status(status)
      }
    }
  }

  /// Downstream space opened up: resume the read side.
  pub fn restart_input(&mut self, pipe: Option<&mut Pipe>, ctx: &mut IoContext) -> EngineStatus {
    if self.state != EngineState::Active {
      return EngineStatus::Ok;
    }
    self.input_stalled = false;
    self.want_in = true;
    self.update_interest(ctx);
    let status = self.read_loop(pipe, ctx);
    self.finish_status(status)
  }

  /// Upstream produced messages: resume the write side.
  pub fn restart_output(&mut self, pipe: Option<&mut Pipe>, ctx: &mut IoContext) -> EngineStatus {
    if self.state != EngineState::Active {
      return EngineStatus::Ok;
    }
    self.output_stalled = false;
    self.want_out = true;
    self.update_interest(ctx);
    let status = self.write_loop(pipe, ctx);
    self.finish_status(status)
  }

  // --- Handshake ---

  fn drive_handshake(&mut self, mut pipe: Option<&mut Pipe>, ctx: &mut IoContext) -> EngineStatus {
    if let Some(status) = self.handshake_send(ctx) {
      return status;
    }
    if let Some(status) = self.handshake_recv(ctx) {
      return status;
    }

    if self.state == EngineState::Active {
      // The readiness event that completed the handshake may already carry
      // framed bytes; drain both directions before returning to the loop.
      let status = self.write_loop(pipe.as_deref_mut(), ctx);
      if !matches!(status, EngineStatus::Ok) {
        return status;
      }
      let status = self.read_loop(pipe, ctx);
      return self.finish_status(status);
    }
    EngineStatus::Ok
  }

  fn handshake_send(&mut self, _ctx: &mut IoContext) -> Option<EngineStatus> {
    while self.greeting_out_pos < GREETING_LENGTH {
      match self.stream.write(&self.greeting_out[self.greeting_out_pos..]) {
        Ok(0) => return Some(EngineStatus::Closed),
        Ok(n) => self.greeting_out_pos += n,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Some(self.io_failed(e)),
      }
    }
    None
  }

  fn handshake_recv(&mut self, _ctx: &mut IoContext) -> Option<EngineStatus> {
    while self.greeting_in_pos < GREETING_LENGTH {
      match self.stream.read(&mut self.greeting_in[self.greeting_in_pos..]) {
        Ok(0) => return Some(EngineStatus::Closed),
        Ok(n) => {
          self.greeting_in_pos += n;
          // Reject a non-matching peer at the first wrong byte.
          if let Err(e) = ZmtpGreeting::check_partial(&self.greeting_in[..self.greeting_in_pos]) {
            self.state = EngineState::Closed;
            return Some(EngineStatus::ProtocolError(e));
          }
        }
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Some(self.io_failed(e)),
      }
    }

    if self.peer_greeting.is_none() {
      let greeting = match ZmtpGreeting::decode(&self.greeting_in) {
        Ok(greeting) => greeting,
        Err(e) => {
          self.state = EngineState::Closed;
          return Some(EngineStatus::ProtocolError(e));
        }
      };
      if !self.socket_type.compatible_with(greeting.socket_type) {
        self.state = EngineState::Closed;
        return Some(EngineStatus::ProtocolError(ZmqError::ProtocolViolation(
          format!(
            "socket type {} cannot talk to peer {}",
            self.socket_type, greeting.socket_type
          ),
        )));
      }
      self.peer_greeting = Some(greeting);
      tracing::debug!(peer_type = %greeting.socket_type, "greeting accepted");
    }

    if self.greeting_out_pos == GREETING_LENGTH {
      self.finish_handshake();
    }
    None
  }

  fn finish_handshake(&mut self) {
    self.state = EngineState::Active;
    self.awaiting_identity_in = true;
    let mut identity = match self.local_identity.as_ref() {
      Some(blob) => Msg::from_vec(blob.as_bytes().to_vec()),
      None => Msg::new(),
    };
    identity.set_flags(MsgFlags::IDENTITY);
    self.identity_out = Some(identity);
    self.want_in = true;
    self.want_out = true;
  }

  /// Collapses the current engine state into the status reported upward,
  /// surfacing readiness exactly once.
  fn finish_status(&mut self, status: EngineStatus) -> EngineStatus {
    match status {
      EngineStatus::Ok => {
        if self.state == EngineState::Active && !self.awaiting_identity_in && !self.ready_notified
        {
          self.ready_notified = true;
          return EngineStatus::Ready {
            peer_identity: self.peer_identity.clone(),
          };
        }
        EngineStatus::Ok
      }
      other => other,
    }
  }

  // --- Steady state ---

  fn read_loop(&mut self, mut pipe: Option<&mut Pipe>, ctx: &mut IoContext) -> EngineStatus {
    let mut status = EngineStatus::Ok;
    loop {
      if self.input_stalled {
        break;
      }

      if self.in_len == 0 && !self.decoder.stalled() {
        let Self {
          stream, decoder, ..
        } = self;
        let buffer = decoder.get_buffer();
        match stream.read(buffer) {
          Ok(0) => {
            status = EngineStatus::Closed;
            break;
          }
          Ok(n) => {
            self.in_off = 0;
            self.in_len = n;
          }
          Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
          Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
          Err(e) => {
            status = self.io_failed(e);
            break;
          }
        }
      }

      let Self {
        decoder,
        awaiting_identity_in,
        peer_identity,
        ..
      } = self;
      let mut sink = EngineSink {
        pipe: pipe.as_deref_mut(),
        awaiting_identity: awaiting_identity_in,
        peer_identity,
      };
      let processed = match decoder.process_buffer(self.in_off, self.in_len, &mut sink) {
        Ok(processed) => processed,
        Err(e) => {
          self.state = EngineState::Closed;
          status = EngineStatus::ProtocolError(e);
          break;
        }
      };
      self.in_off += processed;
      self.in_len -= processed;

      if self.in_len > 0 || self.decoder.stalled() {
        // The session refused a completed message: downstream is full.
        self.input_stalled = true;
        self.want_in = false;
        self.update_interest(ctx);
        break;
      }
    }

    // Wake the reader even on the error paths: messages decoded before an
    // EOF stay deliverable.
    if let Some(pipe) = pipe {
      pipe.flush();
    }
    status
  }

  fn write_loop(&mut self, mut pipe: Option<&mut Pipe>, ctx: &mut IoContext) -> EngineStatus {
    loop {
      if self.encoder.is_empty() {
        let Self {
          encoder,
          identity_out,
          ..
        } = self;
        let mut source = EngineSource {
          pipe: pipe.as_deref_mut(),
          identity: identity_out,
        };
        if !encoder.load(&mut source) {
          // Nothing to send until the session restarts output.
          self.output_stalled = true;
          self.want_out = false;
          self.update_interest(ctx);
          return EngineStatus::Ok;
        }
      }

      match self.stream.write(self.encoder.pending()) {
        Ok(0) => return EngineStatus::Closed,
        Ok(n) => self.encoder.advance(n),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
          self.want_out = true;
          self.update_interest(ctx);
          return EngineStatus::Ok;
        }
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return self.io_failed(e),
      }
    }
  }

  fn io_failed(&mut self, e: io::Error) -> EngineStatus {
    self.state = EngineState::Closed;
    EngineStatus::IoError(ZmqError::Io(e))
  }

  fn update_interest(&mut self, ctx: &mut IoContext) {
    let desired = match (self.want_in, self.want_out) {
      (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
      (true, false) => Some(Interest::READABLE),
      (false, true) => Some(Interest::WRITABLE),
      (false, false) => None,
    };
    if desired == self.registered {
      return;
    }
    let result = match (self.registered, desired) {
      (None, Some(interest)) => ctx.registry.register(&mut self.stream, ctx.token(), interest),
      (Some(_), Some(interest)) => ctx.registry.reregister(&mut self.stream, ctx.token(), interest),
      (Some(_), None) => ctx.registry.deregister(&mut self.stream),
      (None, None) => Ok(()),
    };
    if let Err(e) = result {
      tracing::error!(error = %e, "engine interest update failed");
    }
    self.registered = desired;
  }
}

impl std::fmt::Debug for ZmtpEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ZmtpEngine")
      .field("state", &self.state)
      .field("socket_type", &self.socket_type)
      .field("input_stalled", &self.input_stalled)
      .field("output_stalled", &self.output_stalled)
      .finish()
  }
}
