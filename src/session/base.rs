// src/session/base.rs

//! The per-connection coordinator: owns one engine and one pipe, translates
//! pipe flow control into engine stalls and restarts, reconnects dropped
//! connect-side sessions with bounded exponential backoff, and runs the
//! two-phase termination handshake.

use crate::context::IdSource;
use crate::engine::{EngineStatus, ZmtpEngine};
use crate::message::Blob;
use crate::runtime::command::{Command, CommandKind, ObjectId};
use crate::runtime::mailbox::MailboxSender;
use crate::runtime::pipe::Pipe;
use crate::runtime::reactor::{IoContext, IoObject};
use crate::socket::options::SessionOptions;
use crate::transport::tcp::apply_tcp_socket_options;
use mio::net::TcpStream;
use mio::Interest;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const RECONNECT_TIMER: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
  /// Connect-side: a non-blocking connect is in flight.
  Connecting,
  /// Connect-side: waiting out the reconnect backoff.
  Delaying,
  /// Engine attached (or expected via `Attach`).
  Active,
  /// Shutdown initiated; draining and exchanging acks.
  Terminating,
}

pub(crate) struct SessionBase {
  id: ObjectId,
  endpoint: String,
  socket_id: ObjectId,
  socket_mailbox: MailboxSender,
  options: SessionOptions,
  ids: Arc<IdSource>,

  state: SessionState,
  engine: Option<ZmtpEngine>,
  pipe: Option<Pipe>,
  /// Stream with a connect in flight (Connecting state only).
  pending_stream: Option<TcpStream>,
  /// `None` for accepted sessions; those never reconnect.
  connect_target: Option<SocketAddr>,
  reconnect_attempt: u32,

  /// The socket asked the pipe down; outbound messages drain first.
  draining: bool,
  term_req_sent: bool,
}

impl SessionBase {
  pub fn new_connect(
    id: ObjectId,
    target: SocketAddr,
    endpoint: String,
    socket_id: ObjectId,
    socket_mailbox: MailboxSender,
    options: SessionOptions,
    ids: Arc<IdSource>,
  ) -> Self {
    Self {
      id,
      endpoint,
      socket_id,
      socket_mailbox,
      options,
      ids,
      state: SessionState::Connecting,
      engine: None,
      pipe: None,
      pending_stream: None,
      connect_target: Some(target),
      reconnect_attempt: 0,
      draining: false,
      term_req_sent: false,
    }
  }

  pub fn new_accepted(
    id: ObjectId,
    endpoint: String,
    socket_id: ObjectId,
    socket_mailbox: MailboxSender,
    options: SessionOptions,
    ids: Arc<IdSource>,
  ) -> Self {
    Self {
      id,
      endpoint,
      socket_id,
      socket_mailbox,
      options,
      ids,
      state: SessionState::Active,
      engine: None,
      pipe: None,
      pending_stream: None,
      connect_target: None,
      reconnect_attempt: 0,
      draining: false,
      term_req_sent: false,
    }
  }

  /// Runs `f` against the engine (with the pipe alongside) and feeds the
  /// resulting status back into the session state machine.
  fn with_engine<F>(&mut self, ctx: &mut IoContext, f: F)
  where
    F: FnOnce(&mut ZmtpEngine, Option<&mut Pipe>, &mut IoContext) -> EngineStatus,
  {
    let Self { engine, pipe, .. } = self;
    if let Some(engine) = engine {
      let status = f(engine, pipe.as_mut(), ctx);
      self.handle_engine_status(status, ctx);
    }
  }

  // --- Connecting / reconnecting ---

  fn start_connect(&mut self, ctx: &mut IoContext) {
    let target = match self.connect_target {
      Some(target) => target,
      None => return,
    };
    match TcpStream::connect(target) {
      Ok(mut stream) => {
        if let Err(e) = ctx
          .registry
          .register(&mut stream, ctx.token(), Interest::WRITABLE)
        {
          tracing::error!(session = self.id, error = %e, "connect registration failed");
          self.schedule_reconnect(ctx);
          return;
        }
        self.pending_stream = Some(stream);
        self.state = SessionState::Connecting;
        tracing::debug!(session = self.id, endpoint = %self.endpoint, "connect in flight");
      }
      Err(e) => {
        tracing::debug!(session = self.id, endpoint = %self.endpoint, error = %e, "connect failed");
        self.schedule_reconnect(ctx);
      }
    }
  }

  fn connect_completed(&mut self, ctx: &mut IoContext) {
    let Some(mut stream) = self.pending_stream.take() else {
      return;
    };

    // A writable event ends the non-blocking connect; the error slot tells
    // whether it ended in a connection.
    let failure = match stream.take_error() {
      Ok(Some(e)) => Some(e),
      Ok(None) => match stream.peer_addr() {
        Ok(_) => None,
        Err(e) => Some(e),
      },
      Err(e) => Some(e),
    };

    let _ = ctx.registry.deregister(&mut stream);

    match failure {
      None => {
        if let Err(e) = apply_tcp_socket_options(&stream, &self.options) {
          tracing::warn!(session = self.id, error = %e, "failed to apply TCP options");
        }
        tracing::debug!(session = self.id, endpoint = %self.endpoint, "connection established");
        let mut engine = ZmtpEngine::new(stream, &self.options);
        engine.plug(ctx);
        self.engine = Some(engine);
        self.state = SessionState::Active;
      }
      Some(e) => {
        tracing::debug!(session = self.id, endpoint = %self.endpoint, error = %e, "connect refused");
        self.schedule_reconnect(ctx);
      }
    }
  }

  fn schedule_reconnect(&mut self, ctx: &mut IoContext) {
    if self.state == SessionState::Terminating || self.connect_target.is_none() {
      self.begin_self_destruction();
      return;
    }
    self.state = SessionState::Delaying;
    let interval = self.reconnect_interval();
    self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
    tracing::debug!(session = self.id, endpoint = %self.endpoint, ?interval, "reconnect scheduled");
    ctx.add_timer(interval, RECONNECT_TIMER);
  }

  /// Exponential backoff capped at `reconnect_ivl_max` (constant interval
  /// when unset), with random jitter so herds of sessions spread out.
  fn reconnect_interval(&self) -> Duration {
    let base = self.options.reconnect_ivl.max(Duration::from_millis(1));
    let interval = match self.options.reconnect_ivl_max {
      Some(max) if max > base => {
        let factor = 1u32 << self.reconnect_attempt.min(16);
        base.saturating_mul(factor).min(max)
      }
      _ => base,
    };
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64);
    interval + Duration::from_millis(jitter_ms)
  }

  // --- Engine status handling ---

  fn handle_engine_status(&mut self, status: EngineStatus, ctx: &mut IoContext) {
    match status {
      EngineStatus::Ok => {
        if self.draining {
          self.check_drain_done(ctx);
        }
      }
      EngineStatus::Ready { peer_identity } => {
        tracing::debug!(session = self.id, endpoint = %self.endpoint, "engine ready");
        self.reconnect_attempt = 0;
        if self.pipe.is_none() {
          self.create_pipe(peer_identity, ctx);
        } else if let Some(pipe) = self.pipe.as_mut() {
          // Reconnect over an existing pipe: nudge the socket to
          // re-examine both directions.
          pipe.hiccup();
        }
        // Deliver anything queued while the connection was down, and pull
        // in frames that arrived alongside the handshake (those stalled
        // the input while there was no pipe to put them in).
        self.with_engine(ctx, |engine, pipe, ctx| engine.restart_output(pipe, ctx));
        self.with_engine(ctx, |engine, pipe, ctx| {
          if engine.is_input_stalled() {
            engine.restart_input(pipe, ctx)
          } else {
            EngineStatus::Ok
          }
        });
      }
      EngineStatus::Closed => {
        tracing::debug!(session = self.id, endpoint = %self.endpoint, "connection closed");
        self.engine_gone(ctx, false);
      }
      EngineStatus::IoError(e) => {
        tracing::debug!(session = self.id, endpoint = %self.endpoint, error = %e, "transport error");
        self.engine_gone(ctx, false);
      }
      EngineStatus::ProtocolError(e) => {
        // Protocol violations never reconnect: the misbehaving peer gets
        // dropped, other sessions on the reactor are unaffected.
        tracing::warn!(session = self.id, endpoint = %self.endpoint, error = %e, "protocol error; dropping connection");
        self.engine_gone(ctx, true);
      }
    }
  }

  fn engine_gone(&mut self, ctx: &mut IoContext, protocol_error: bool) {
    self.detach_engine(ctx);
    if self.state == SessionState::Terminating {
      self.finish_drain(ctx);
    } else if self.connect_target.is_some() && !protocol_error {
      self.schedule_reconnect(ctx);
    } else {
      self.begin_self_destruction();
    }
  }

  fn create_pipe(&mut self, peer_identity: Option<Blob>, ctx: &mut IoContext) {
    let local_id = self.ids.next();
    let remote_id = self.ids.next();
    // Session-to-socket carries decoded inbound traffic (RCVHWM); the
    // reverse direction carries outbound traffic (SNDHWM).
    let (mut local, mut remote) = Pipe::pair(
      local_id,
      remote_id,
      self.options.rcvhwm,
      self.options.sndhwm,
    );
    local.set_peer(self.socket_id, self.socket_mailbox.clone());
    remote.set_peer(self.id, ctx.sender.clone());
    self.pipe = Some(local);

    let _ = self.socket_mailbox.send(Command {
      dest: self.socket_id,
      kind: CommandKind::Bind {
        pipe: remote,
        peer_identity,
        endpoint: self.endpoint.clone(),
      },
    });
  }

  fn detach_engine(&mut self, ctx: &mut IoContext) {
    if let Some(mut engine) = self.engine.take() {
      engine.terminate(ctx);
    }
  }

  // --- Termination ---

  /// No engine and no future: tear the pipe down, then ask the owner to
  /// reap us.
  fn begin_self_destruction(&mut self) {
    self.state = SessionState::Terminating;
    match self.pipe {
      Some(ref mut pipe) => pipe.terminate(),
      None => self.send_term_req(),
    }
  }

  fn send_term_req(&mut self) {
    if self.term_req_sent {
      return;
    }
    self.term_req_sent = true;
    let _ = self.socket_mailbox.send(Command {
      dest: self.socket_id,
      kind: CommandKind::TermReq { object: self.id },
    });
  }

  /// The socket asked the pipe down. In-flight outbound messages drain
  /// through the engine before the ack; without an engine they are
  /// explicitly dropped.
  fn process_pipe_term(&mut self, ctx: &mut IoContext) {
    self.state = SessionState::Terminating;
    self.draining = true;
    // Pump whatever remains, then ack once everything is on the wire.
    self.with_engine(ctx, |engine, pipe, ctx| engine.restart_output(pipe, ctx));
    if self.draining {
      self.check_drain_done(ctx);
    }
  }

  fn check_drain_done(&mut self, ctx: &mut IoContext) {
    let pipe_empty = self.pipe.as_ref().map_or(true, |pipe| !pipe.check_read());
    let engine_idle = self
      .engine
      .as_ref()
      .map_or(true, |engine| engine.output_idle());
    if self.engine.is_none() || (pipe_empty && engine_idle) {
      self.finish_drain(ctx);
    }
  }

  fn finish_drain(&mut self, ctx: &mut IoContext) {
    if !self.draining {
      return;
    }
    self.draining = false;
    if let Some(mut pipe) = self.pipe.take() {
      pipe.ack_term();
    }
    self.detach_engine(ctx);
    self.send_term_req();
  }
}

impl IoObject for SessionBase {
  fn plug(&mut self, ctx: &mut IoContext) {
    tracing::debug!(session = self.id, endpoint = %self.endpoint, "session plugged");
    if self.connect_target.is_some() {
      self.start_connect(ctx);
    }
  }

  fn on_readable(&mut self, ctx: &mut IoContext) {
    match self.state {
      SessionState::Connecting => self.connect_completed(ctx),
      _ => self.with_engine(ctx, |engine, pipe, ctx| engine.handle_readable(pipe, ctx)),
    }
  }

  fn on_writable(&mut self, ctx: &mut IoContext) {
    match self.state {
      SessionState::Connecting => self.connect_completed(ctx),
      _ => self.with_engine(ctx, |engine, pipe, ctx| engine.handle_writable(pipe, ctx)),
    }
  }

  fn on_timer(&mut self, timer_id: u64, ctx: &mut IoContext) {
    if timer_id == RECONNECT_TIMER && self.state == SessionState::Delaying {
      self.start_connect(ctx);
    }
  }

  fn on_command(&mut self, kind: CommandKind, ctx: &mut IoContext) {
    match kind {
      CommandKind::Attach { engine } => {
        if self.engine.is_some() {
          tracing::warn!(session = self.id, "attach with engine already present; dropping new engine");
          return;
        }
        let mut engine = *engine;
        engine.plug(ctx);
        self.engine = Some(engine);
        self.state = SessionState::Active;
      }
      CommandKind::ActivateRead { pipe } => {
        if !self.owns_pipe(pipe) {
          return;
        }
        if self.engine.is_some() {
          self.with_engine(ctx, |engine, pipe, ctx| engine.restart_output(pipe, ctx));
        } else if self.draining {
          self.check_drain_done(ctx);
        }
      }
      CommandKind::ActivateWrite { pipe, msgs_read } => {
        if !self.owns_pipe(pipe) {
          return;
        }
        let unblocked = self
          .pipe
          .as_mut()
          .map_or(false, |p| p.process_activate_write(msgs_read));
        if unblocked {
          self.with_engine(ctx, |engine, pipe, ctx| {
            if engine.is_input_stalled() {
              engine.restart_input(pipe, ctx)
            } else {
              EngineStatus::Ok
            }
          });
        }
      }
      CommandKind::Hiccup { pipe } => {
        if !self.owns_pipe(pipe) {
          return;
        }
        self.with_engine(ctx, |engine, pipe, ctx| engine.restart_output(pipe, ctx));
        self.with_engine(ctx, |engine, pipe, ctx| {
          if engine.is_input_stalled() {
            engine.restart_input(pipe, ctx)
          } else {
            EngineStatus::Ok
          }
        });
      }
      CommandKind::PipeTerm { pipe } => {
        if !self.owns_pipe(pipe) {
          return;
        }
        self.process_pipe_term(ctx);
      }
      CommandKind::PipeTermAck { pipe } => {
        if !self.owns_pipe(pipe) {
          return;
        }
        if let Some(mut pipe) = self.pipe.take() {
          pipe.term_acked();
        }
        self.send_term_req();
      }
      CommandKind::Term => {
        tracing::debug!(session = self.id, endpoint = %self.endpoint, "session received term");
        self.state = SessionState::Terminating;
        ctx.cancel_timer(RECONNECT_TIMER);
        self.detach_engine(ctx);
        if let Some(mut pipe) = self.pipe.take() {
          // Forced shutdown (linger expiry): release the pipe without
          // waiting on the peer.
          pipe.ack_term();
        }
        let _ = self.socket_mailbox.send(Command {
          dest: self.socket_id,
          kind: CommandKind::TermAck { object: self.id },
        });
        ctx.retire();
      }
      other => {
        tracing::warn!(
          session = self.id,
          command = other.variant_name(),
          "session received unhandled command"
        );
      }
    }
  }

  fn unplug(&mut self, ctx: &mut IoContext) {
    self.detach_engine(ctx);
    if let Some(mut stream) = self.pending_stream.take() {
      let _ = ctx.registry.deregister(&mut stream);
    }
    tracing::debug!(session = self.id, endpoint = %self.endpoint, "session unplugged");
  }
}

impl SessionBase {
  fn owns_pipe(&self, pipe_id: ObjectId) -> bool {
    self.pipe.as_ref().map_or(false, |p| p.local_id() == pipe_id)
  }
}
