// src/runtime/command.rs

//! Commands exchanged between sockets, sessions, listeners and reactors.
//!
//! Commands are transported by value through mailboxes and addressed by
//! object id. Object ids are allocated from a context-global counter and
//! never reused, so a command racing with its target's destruction simply
//! fails the registry lookup at the receiver and is dropped.

use crate::engine::ZmtpEngine;
use crate::message::Blob;
use crate::runtime::mailbox::MailboxSender;
use crate::runtime::pipe::Pipe;
use crate::runtime::reactor::IoObject;

/// Identifies a command target: a reactor-owned object, a socket, or a pipe
/// end.
pub(crate) type ObjectId = usize;

/// Reserved destination for commands handled by the reactor loop itself.
pub(crate) const REACTOR_DEST: ObjectId = 0;

pub(crate) struct Command {
  pub dest: ObjectId,
  pub kind: CommandKind,
}

pub(crate) enum CommandKind {
  /// Shut down the receiving reactor loop (dest `REACTOR_DEST`) or object.
  Stop,
  /// Insert a new object into the receiving reactor's registry.
  Plug { object: Box<dyn IoObject + Send> },
  /// Hand a freshly connected engine to a session.
  Attach { engine: Box<ZmtpEngine> },
  /// A child announces itself to its owning socket for teardown tracking.
  Own {
    object: ObjectId,
    mailbox: MailboxSender,
  },
  /// A session (or inproc connect) delivers a new pipe end to a socket.
  Bind {
    pipe: Pipe,
    peer_identity: Option<Blob>,
    endpoint: String,
  },
  /// The pipe writer woke a sleeping reader.
  ActivateRead { pipe: ObjectId },
  /// The pipe reader reports progress so a stalled writer can resume.
  ActivateWrite { pipe: ObjectId, msgs_read: u64 },
  /// The peer swapped its engine; re-check both pipe directions.
  Hiccup { pipe: ObjectId },
  /// First phase of pipe shutdown.
  PipeTerm { pipe: ObjectId },
  /// Second phase: the peer drained and released its end.
  PipeTermAck { pipe: ObjectId },
  /// A child asks its owner to terminate it.
  TermReq { object: ObjectId },
  /// The owner tells a child to shut down.
  Term,
  /// The child finished shutting down.
  TermAck { object: ObjectId },
}

impl CommandKind {
  /// Returns the command variant's name. Useful for logging.
  pub fn variant_name(&self) -> &'static str {
    match self {
      CommandKind::Stop => "Stop",
      CommandKind::Plug { .. } => "Plug",
      CommandKind::Attach { .. } => "Attach",
      CommandKind::Own { .. } => "Own",
      CommandKind::Bind { .. } => "Bind",
      CommandKind::ActivateRead { .. } => "ActivateRead",
      CommandKind::ActivateWrite { .. } => "ActivateWrite",
      CommandKind::Hiccup { .. } => "Hiccup",
      CommandKind::PipeTerm { .. } => "PipeTerm",
      CommandKind::PipeTermAck { .. } => "PipeTermAck",
      CommandKind::TermReq { .. } => "TermReq",
      CommandKind::Term => "Term",
      CommandKind::TermAck { .. } => "TermAck",
    }
  }
}

impl Command {
  /// Returns the command variant's name. Useful for logging.
  pub fn variant_name(&self) -> &'static str {
    self.kind.variant_name()
  }
}

impl std::fmt::Debug for Command {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Command")
      .field("dest", &self.dest)
      .field("kind", &self.variant_name())
      .finish()
  }
}
