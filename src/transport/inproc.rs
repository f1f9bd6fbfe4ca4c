// src/transport/inproc.rs

//! The in-process transport: a context-level rendezvous table mapping
//! endpoint names to bound sockets. A connect attaches a pipe pair
//! directly, with no framing and no engine.

use crate::message::Blob;
use crate::runtime::command::ObjectId;
use crate::runtime::mailbox::MailboxSender;
use crate::runtime::pipe::Pipe;
use crate::socket::types::SocketType;

/// What the rendezvous table stores per bound name.
#[derive(Clone)]
pub(crate) struct InprocBinding {
  pub socket_id: ObjectId,
  pub socket_type: SocketType,
  pub mailbox: MailboxSender,
  pub sndhwm: usize,
  pub rcvhwm: usize,
  pub routing_id: Option<Blob>,
}

/// Builds the pipe pair for one inproc connection. Each direction's bound
/// is the writer's send HWM plus the reader's receive HWM, as in the
/// reference.
pub(crate) fn inproc_pipe_pair(
  connector_end_id: ObjectId,
  binder_end_id: ObjectId,
  connector_sndhwm: usize,
  connector_rcvhwm: usize,
  binding: &InprocBinding,
) -> (Pipe, Pipe) {
  let hwm_connector_to_binder = connector_sndhwm.saturating_add(binding.rcvhwm);
  let hwm_binder_to_connector = binding.sndhwm.saturating_add(connector_rcvhwm);
  Pipe::pair(
    connector_end_id,
    binder_end_id,
    hwm_connector_to_binder,
    hwm_binder_to_connector,
  )
}
