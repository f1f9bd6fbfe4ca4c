// src/socket/core.rs

//! The user-thread half of a socket: the command mailbox, the pipe set, the
//! option store and the blocking send/recv machinery around the pattern
//! logic. Commands from reactors and peer sockets are processed whenever
//! the user calls into the socket, and waited on when an operation blocks.

use crate::context::Context;
use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::command::{Command, CommandKind, ObjectId};
use crate::runtime::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::runtime::pipe::Pipe;
use crate::session::SessionBase;
use crate::socket::options::{SocketOptions, SUBSCRIBE, UNSUBSCRIBE};
use crate::socket::types::SocketType;
use crate::socket::ISocket;
use crate::transport::endpoint::{parse_endpoint, Endpoint};
use crate::transport::inproc::{inproc_pipe_pair, InprocBinding};
use crate::transport::tcp::TcpListener;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// How long the closing socket waits for stragglers to ack their `Term`
/// after the linger phase. Reactors answer promptly; this only bounds the
/// wait against a torn-down reactor.
const TERM_ACK_GRACE: Duration = Duration::from_secs(2);

/// A zero timeout means "do not wait" and reports EAGAIN; an elapsed
/// positive timeout is a timeout proper.
fn timeout_error(configured: Option<Duration>) -> ZmqError {
  if configured == Some(Duration::ZERO) {
    ZmqError::ResourceLimitReached
  } else {
    ZmqError::Timeout
  }
}

/// The pipes attached to one socket, keyed by their local end id.
#[derive(Default)]
pub(crate) struct PipeSet {
  pipes: HashMap<ObjectId, Pipe>,
}

impl PipeSet {
  pub fn get(&self, pipe_id: ObjectId) -> Option<&Pipe> {
    self.pipes.get(&pipe_id)
  }

  pub fn get_mut(&mut self, pipe_id: ObjectId) -> Option<&mut Pipe> {
    self.pipes.get_mut(&pipe_id)
  }

  pub fn insert(&mut self, pipe: Pipe) {
    self.pipes.insert(pipe.local_id(), pipe);
  }

  pub fn remove(&mut self, pipe_id: ObjectId) -> Option<Pipe> {
    self.pipes.remove(&pipe_id)
  }

  pub fn ids(&self) -> Vec<ObjectId> {
    self.pipes.keys().copied().collect()
  }

  pub fn is_empty(&self) -> bool {
    self.pipes.is_empty()
  }
}

pub(crate) struct SocketCore {
  pub id: ObjectId,
  pub socket_type: SocketType,
  context: Context,
  mailbox: Mailbox,
  mailbox_sender: MailboxSender,
  pub options: SocketOptions,
  logic: Box<dyn ISocket>,
  pipes: PipeSet,

  /// Sessions and listeners this socket owns, with the mailbox that
  /// reaches their reactor.
  owned: HashMap<ObjectId, MailboxSender>,
  /// Bound/connected endpoint string -> owning object.
  endpoints: HashMap<String, ObjectId>,
  bound_inproc: Vec<String>,
  /// TCP pipes whose termination ack gates the linger wait.
  pipes_awaiting_ack: HashSet<ObjectId>,
  /// Remembers which pipes belong to the in-process transport.
  inproc_pipes: HashSet<ObjectId>,
  /// Pipes whose peer terminated while inbound messages were still
  /// unread; they stay readable and are acked once drained.
  doomed_pipes: HashSet<ObjectId>,

  last_endpoint: Option<String>,
  closed: bool,
}

impl SocketCore {
  pub fn new(
    context: Context,
    socket_type: SocketType,
    logic: Box<dyn ISocket>,
  ) -> Result<Self, ZmqError> {
    let (mailbox_sender, mailbox) = mailbox()?;
    let id = context.ids().next();
    tracing::debug!(socket = id, socket_type = %socket_type, "socket created");
    Ok(Self {
      id,
      socket_type,
      context,
      mailbox,
      mailbox_sender,
      options: SocketOptions::default(),
      logic,
      pipes: PipeSet::default(),
      owned: HashMap::new(),
      endpoints: HashMap::new(),
      bound_inproc: Vec::new(),
      pipes_awaiting_ack: HashSet::new(),
      inproc_pipes: HashSet::new(),
      doomed_pipes: HashSet::new(),
      last_endpoint: None,
      closed: false,
    })
  }

  pub fn last_endpoint(&self) -> Option<&str> {
    self.last_endpoint.as_deref()
  }

  // --- Command processing ---

  /// Drains queued commands, waiting up to `timeout` for the first one.
  pub fn process_commands(&mut self, timeout: Option<Duration>) -> Result<(), ZmqError> {
    let mut wait = timeout;
    loop {
      let cmd = match self.mailbox.recv(wait)? {
        Some(cmd) => cmd,
        None => return Ok(()),
      };
      self.handle_command(cmd);
      wait = Some(Duration::ZERO);
    }
  }

  fn handle_command(&mut self, cmd: Command) {
    tracing::trace!(socket = self.id, command = cmd.variant_name(), "socket command");
    match cmd.kind {
      CommandKind::Bind {
        mut pipe,
        peer_identity,
        endpoint,
      } => {
        let pipe_id = pipe.local_id();
        if endpoint.starts_with("inproc://") {
          self.inproc_pipes.insert(pipe_id);
        }
        if self.closed {
          // Too late to attach: tear the newcomer straight down.
          pipe.terminate();
          if !self.inproc_pipes.contains(&pipe_id) {
            self.pipes_awaiting_ack.insert(pipe_id);
          }
          self.pipes.insert(pipe);
          return;
        }
        tracing::debug!(socket = self.id, pipe = pipe_id, endpoint = %endpoint, "pipe attached");
        self.pipes.insert(pipe);
        self.logic.attach_pipe(pipe_id, peer_identity);
      }
      CommandKind::ActivateRead { pipe } => {
        self.logic.read_activated(pipe);
      }
      CommandKind::ActivateWrite { pipe, msgs_read } => {
        if let Some(p) = self.pipes.get_mut(pipe) {
          p.process_activate_write(msgs_read);
        }
        self.logic.write_activated(pipe);
      }
      CommandKind::Hiccup { pipe } => {
        self.logic.read_activated(pipe);
        self.logic.write_activated(pipe);
      }
      CommandKind::PipeTerm { pipe } => {
        self.pipes_awaiting_ack.remove(&pipe);
        self.inproc_pipes.remove(&pipe);
        // Messages already delivered into this pipe stay readable; the
        // ack is deferred until the application drained them.
        if self.pipes.get(pipe).is_some_and(|p| p.check_read()) && !self.closed {
          tracing::debug!(socket = self.id, pipe, "peer gone; pipe kept until drained");
          self.doomed_pipes.insert(pipe);
          return;
        }
        self.logic.pipe_detached(pipe);
        self.doomed_pipes.remove(&pipe);
        if let Some(mut p) = self.pipes.remove(pipe) {
          p.ack_term();
        }
      }
      CommandKind::PipeTermAck { pipe } => {
        // Detaching twice is harmless; an unsolicited ack (a disconnected
        // session releasing its end) needs it.
        self.logic.pipe_detached(pipe);
        self.pipes_awaiting_ack.remove(&pipe);
        self.inproc_pipes.remove(&pipe);
        self.doomed_pipes.remove(&pipe);
        if let Some(mut p) = self.pipes.remove(pipe) {
          p.term_acked();
        }
      }
      CommandKind::Own { object, mailbox } => {
        if self.closed {
          let _ = mailbox.send(Command {
            dest: object,
            kind: CommandKind::Term,
          });
        }
        self.owned.insert(object, mailbox);
      }
      CommandKind::TermReq { object } => {
        if let Some(mailbox) = self.owned.get(&object) {
          let _ = mailbox.send(Command {
            dest: object,
            kind: CommandKind::Term,
          });
        }
      }
      CommandKind::TermAck { object } => {
        self.owned.remove(&object);
        self.endpoints.retain(|_, &mut owner| owner != object);
      }
      other => {
        tracing::warn!(
          socket = self.id,
          command = other.variant_name(),
          "socket received unhandled command"
        );
      }
    }
  }

  // --- Bind / connect ---

  pub fn bind(&mut self, endpoint: &str) -> Result<(), ZmqError> {
    self.ensure_open()?;
    match parse_endpoint(endpoint)? {
      Endpoint::Tcp(addr, uri) => {
        let listener_id = self.context.ids().next();
        let reactor_sender = self.context.pick_reactor();
        let (listener, local_addr) = TcpListener::bind(
          listener_id,
          addr,
          uri,
          self.id,
          self.mailbox_sender.clone(),
          self.options.session_options(self.socket_type),
          self.context.ids_arc(),
        )?;
        let resolved = format!("tcp://{}", local_addr);
        self.owned.insert(listener_id, reactor_sender.clone());
        self.endpoints.insert(resolved.clone(), listener_id);
        reactor_sender.send(Command {
          dest: listener_id,
          kind: CommandKind::Plug {
            object: Box::new(listener),
          },
        })?;
        self.last_endpoint = Some(resolved);
        Ok(())
      }
      Endpoint::Inproc(name) => {
        self.context.register_inproc(
          &name,
          InprocBinding {
            socket_id: self.id,
            socket_type: self.socket_type,
            mailbox: self.mailbox_sender.clone(),
            sndhwm: self.options.sndhwm,
            rcvhwm: self.options.rcvhwm,
            routing_id: self.options.routing_id.clone(),
          },
        )?;
        self.bound_inproc.push(name.clone());
        self.last_endpoint = Some(format!("inproc://{}", name));
        Ok(())
      }
    }
  }

  pub fn connect(&mut self, endpoint: &str) -> Result<(), ZmqError> {
    self.ensure_open()?;
    match parse_endpoint(endpoint)? {
      Endpoint::Tcp(addr, uri) => {
        let session_id = self.context.ids().next();
        let reactor_sender = self.context.pick_reactor();
        let session = SessionBase::new_connect(
          session_id,
          addr,
          uri.clone(),
          self.id,
          self.mailbox_sender.clone(),
          self.options.session_options(self.socket_type),
          self.context.ids_arc(),
        );
        self.owned.insert(session_id, reactor_sender.clone());
        self.endpoints.insert(uri, session_id);
        reactor_sender.send(Command {
          dest: session_id,
          kind: CommandKind::Plug {
            object: Box::new(session),
          },
        })?;
        Ok(())
      }
      Endpoint::Inproc(name) => {
        let binding = self
          .context
          .lookup_inproc(&name)
          .ok_or_else(|| ZmqError::ConnectionRefused(format!("inproc endpoint '{}' not bound", name)))?;

        if !self.socket_type.compatible_with(binding.socket_type) {
          return Err(ZmqError::InvalidSocketType(self.socket_type.name()));
        }

        let our_end_id = self.context.ids().next();
        let their_end_id = self.context.ids().next();
        let (mut ours, mut theirs) = inproc_pipe_pair(
          our_end_id,
          their_end_id,
          self.options.sndhwm,
          self.options.rcvhwm,
          &binding,
        );
        ours.set_peer(binding.socket_id, binding.mailbox.clone());
        theirs.set_peer(self.id, self.mailbox_sender.clone());

        self.inproc_pipes.insert(our_end_id);
        self.pipes.insert(ours);
        self.logic.attach_pipe(our_end_id, binding.routing_id.clone());

        binding.mailbox.send(Command {
          dest: binding.socket_id,
          kind: CommandKind::Bind {
            pipe: theirs,
            peer_identity: self.options.routing_id.clone(),
            endpoint: format!("inproc://{}", name),
          },
        })?;
        Ok(())
      }
    }
  }

  /// Stops listening on (or connecting to) an endpoint established by
  /// `bind`/`connect`. Established connections through it close abruptly.
  pub fn unplug_endpoint(&mut self, endpoint: &str) -> Result<(), ZmqError> {
    self.ensure_open()?;
    self.process_commands(Some(Duration::ZERO))?;
    let object = self
      .endpoints
      .remove(endpoint)
      .ok_or_else(|| ZmqError::InvalidArgument(format!("endpoint not in use: {}", endpoint)))?;
    if let Some(mailbox) = self.owned.get(&object) {
      let _ = mailbox.send(Command {
        dest: object,
        kind: CommandKind::Term,
      });
    }
    Ok(())
  }

  // --- Send / recv ---

  pub fn send(&mut self, msg: Msg) -> Result<(), ZmqError> {
    self.ensure_open()?;
    let deadline = self.options.sndtimeo.map(|t| Instant::now() + t);
    loop {
      self.process_commands(Some(Duration::ZERO))?;
      self.reap_doomed_pipes();
      let Self { logic, pipes, .. } = self;
      match logic.xsend(pipes, msg.clone()) {
        Ok(()) => return Ok(()),
        Err(ZmqError::ResourceLimitReached) => {}
        Err(e) => return Err(e),
      }
      if !self.wait_for_command(deadline)? {
        return Err(timeout_error(self.options.sndtimeo));
      }
    }
  }

  pub fn recv(&mut self) -> Result<Msg, ZmqError> {
    self.ensure_open()?;
    let deadline = self.options.rcvtimeo.map(|t| Instant::now() + t);
    loop {
      self.process_commands(Some(Duration::ZERO))?;
      let Self { logic, pipes, .. } = self;
      let outcome = logic.xrecv(pipes);
      self.reap_doomed_pipes();
      match outcome {
        Ok(msg) => return Ok(msg),
        Err(ZmqError::ResourceLimitReached) => {}
        Err(e) => return Err(e),
      }
      if !self.wait_for_command(deadline)? {
        return Err(timeout_error(self.options.rcvtimeo));
      }
    }
  }

  /// Blocks on the mailbox until a command arrives or the deadline passes.
  /// Returns false when the deadline cut the wait short.
  fn wait_for_command(&mut self, deadline: Option<Instant>) -> Result<bool, ZmqError> {
    match deadline {
      None => {
        self.process_commands(None)?;
        Ok(true)
      }
      Some(deadline) => {
        let now = Instant::now();
        if now >= deadline {
          return Ok(false);
        }
        self.process_commands(Some(deadline - now))?;
        Ok(true)
      }
    }
  }

  /// Detaches and acks doomed pipes whose inbound messages are now fully
  /// consumed.
  fn reap_doomed_pipes(&mut self) {
    if self.doomed_pipes.is_empty() {
      return;
    }
    let drained: Vec<ObjectId> = self
      .doomed_pipes
      .iter()
      .copied()
      .filter(|&id| self.pipes.get(id).map_or(true, |pipe| !pipe.check_read()))
      .collect();
    for pipe_id in drained {
      self.doomed_pipes.remove(&pipe_id);
      self.logic.pipe_detached(pipe_id);
      if let Some(mut pipe) = self.pipes.remove(pipe_id) {
        pipe.ack_term();
      }
      tracing::debug!(socket = self.id, pipe = pipe_id, "doomed pipe drained and released");
    }
  }

  // --- Options ---

  pub fn set_option(&mut self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.ensure_open()?;
    match option {
      SUBSCRIBE | UNSUBSCRIBE => self.logic.set_pattern_option(option, value),
      _ => self.options.set(option, value),
    }
  }

  fn ensure_open(&self) -> Result<(), ZmqError> {
    if self.closed {
      return Err(ZmqError::InvalidState("socket is closed"));
    }
    Ok(())
  }

  // --- Shutdown ---

  /// Closes the socket: terminates every pipe, lets TCP sessions drain
  /// in-flight messages within the linger bound, then tears down all owned
  /// objects. Idempotent.
  pub fn close(&mut self) -> Result<(), ZmqError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;
    tracing::debug!(socket = self.id, "socket closing");

    for name in std::mem::take(&mut self.bound_inproc) {
      self.context.unregister_inproc(&name);
    }

    // First phase: ask every pipe down. Sessions drain before acking;
    // pipes already doomed by a dead peer just get their deferred ack.
    for pipe_id in self.pipes.ids() {
      self.logic.pipe_detached(pipe_id);
      if self.doomed_pipes.remove(&pipe_id) {
        if let Some(mut pipe) = self.pipes.remove(pipe_id) {
          pipe.ack_term();
        }
        continue;
      }
      if let Some(pipe) = self.pipes.get_mut(pipe_id) {
        pipe.terminate();
      }
      if !self.inproc_pipes.contains(&pipe_id) {
        self.pipes_awaiting_ack.insert(pipe_id);
      }
    }

    // Linger: wait for the drain acks.
    let linger_deadline = self.options.linger.map(|t| Instant::now() + t);
    while !self.pipes_awaiting_ack.is_empty() {
      let wait = match linger_deadline {
        None => None,
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            tracing::debug!(socket = self.id, "linger expired with undelivered messages");
            break;
          }
          Some(deadline - now)
        }
      };
      self.process_commands(wait)?;
    }

    // Second phase: force-terminate everything still owned.
    for (&object, mailbox) in &self.owned {
      let _ = mailbox.send(Command {
        dest: object,
        kind: CommandKind::Term,
      });
    }
    let grace_deadline = Instant::now() + TERM_ACK_GRACE;
    while !self.owned.is_empty() {
      let now = Instant::now();
      if now >= grace_deadline {
        tracing::warn!(socket = self.id, stragglers = self.owned.len(), "term acks missing; giving up");
        break;
      }
      self.process_commands(Some(grace_deadline - now))?;
    }

    tracing::debug!(socket = self.id, "socket closed");
    self.context.socket_closed();
    Ok(())
  }
}
