// src/runtime/mod.rs

//! Core runtime primitives: the self-pipe signaler, command mailboxes, the
//! reactor (I/O thread) and the inter-thread message pipes.

pub(crate) mod command;
pub(crate) mod mailbox;
pub(crate) mod pipe;
pub(crate) mod reactor;
pub(crate) mod signaler;

pub(crate) use command::{Command, CommandKind, ObjectId, REACTOR_DEST};
pub(crate) use mailbox::{mailbox, Mailbox, MailboxSender};
pub(crate) use pipe::Pipe;
pub(crate) use reactor::{IoContext, IoObject, Reactor, ReactorHandle};
pub(crate) use signaler::Signaler;
