// src/runtime/pipe.rs

//! A bounded, single-producer/single-consumer message pipe between a socket
//! and a session (or two sockets, for inproc connections).
//!
//! Conceptually bidirectional, internally two one-way lock-free queues.
//! Readiness crosses threads only as commands posted to the peer owner's
//! mailbox: `ActivateRead` when a writer flushes into a sleeping reader,
//! `ActivateWrite` when the reader's progress crosses the low-water-mark.

use crate::message::Msg;
use crate::runtime::command::{Command, CommandKind, ObjectId};
use crate::runtime::mailbox::MailboxSender;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct PipeQueue {
  queue: SegQueue<Msg>,
  /// Set by the reader when it finds the queue empty; the writer's flush
  /// swaps it off and posts `ActivateRead`.
  reader_sleeping: AtomicBool,
}

impl PipeQueue {
  fn new() -> Self {
    Self {
      queue: SegQueue::new(),
      reader_sleeping: AtomicBool::new(false),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeState {
  Active,
  /// We sent `PipeTerm` and wait for the ack.
  TermSent,
  /// Termination handshake finished; the pipe is dead.
  Terminated,
}

pub(crate) struct Pipe {
  local_id: ObjectId,
  peer_id: ObjectId,
  peer_owner: ObjectId,
  peer_mailbox: Option<MailboxSender>,

  in_q: Arc<PipeQueue>,
  out_q: Arc<PipeQueue>,

  /// Bound on in-flight messages in the outbound direction.
  out_hwm: u64,
  /// Reporting threshold for inbound reads (half the peer's HWM).
  in_lwm: u64,

  msgs_written: u64,
  msgs_read: u64,
  peers_msgs_read: u64,

  /// The last written frame had MORE set: the rest of the logical message
  /// is always accepted so multipart messages stay atomic.
  out_more: bool,

  state: PipeState,
}

impl Pipe {
  /// Creates a connected pair of pipe ends.
  ///
  /// `hwm_a_to_b` bounds the direction written by end A and read by end B;
  /// `hwm_b_to_a` the reverse. Peer addressing must be filled in with
  /// [`Pipe::set_peer`] before the ends are handed to their owners.
  pub fn pair(
    id_a: ObjectId,
    id_b: ObjectId,
    hwm_a_to_b: usize,
    hwm_b_to_a: usize,
  ) -> (Pipe, Pipe) {
    let a_to_b = Arc::new(PipeQueue::new());
    let b_to_a = Arc::new(PipeQueue::new());

    let end_a = Pipe {
      local_id: id_a,
      peer_id: id_b,
      peer_owner: 0,
      peer_mailbox: None,
      in_q: b_to_a.clone(),
      out_q: a_to_b.clone(),
      out_hwm: hwm_a_to_b.max(1) as u64,
      in_lwm: ((hwm_b_to_a.max(1) as u64) / 2).max(1),
      msgs_written: 0,
      msgs_read: 0,
      peers_msgs_read: 0,
      out_more: false,
      state: PipeState::Active,
    };
    let end_b = Pipe {
      local_id: id_b,
      peer_id: id_a,
      peer_owner: 0,
      peer_mailbox: None,
      in_q: a_to_b,
      out_q: b_to_a,
      out_hwm: hwm_b_to_a.max(1) as u64,
      in_lwm: ((hwm_a_to_b.max(1) as u64) / 2).max(1),
      msgs_written: 0,
      msgs_read: 0,
      peers_msgs_read: 0,
      out_more: false,
      state: PipeState::Active,
    };
    (end_a, end_b)
  }

  /// Records where the peer end lives so readiness commands can reach it.
  pub fn set_peer(&mut self, owner: ObjectId, mailbox: MailboxSender) {
    self.peer_owner = owner;
    self.peer_mailbox = Some(mailbox);
  }

  pub fn local_id(&self) -> ObjectId {
    self.local_id
  }

  pub fn state(&self) -> PipeState {
    self.state
  }

  fn post_to_peer(&self, kind: CommandKind) {
    if let Some(ref mailbox) = self.peer_mailbox {
      let cmd = Command {
        dest: self.peer_owner,
        kind,
      };
      if mailbox.send(cmd).is_err() {
        tracing::trace!(pipe = self.local_id, "peer mailbox gone; command dropped");
      }
    }
  }

  // --- Read side ---

  /// Non-destructive readability check.
  pub fn check_read(&self) -> bool {
    !self.in_q.queue.is_empty()
  }

  /// Pops one message, maintaining the sleep flag and LWM reporting.
  pub fn read(&mut self) -> Option<Msg> {
    let msg = match self.in_q.queue.pop() {
      Some(msg) => msg,
      None => {
        // Mark ourselves asleep, then re-check: a writer that pushed
        // between the failed pop and the flag store will still see the
        // flag and wake us, and a push that landed before the store is
        // picked up here.
        self.in_q.reader_sleeping.store(true, Ordering::SeqCst);
        match self.in_q.queue.pop() {
          Some(msg) => {
            self.in_q.reader_sleeping.store(false, Ordering::SeqCst);
            msg
          }
          None => return None,
        }
      }
    };

    self.msgs_read += 1;
    if self.msgs_read % self.in_lwm == 0 {
      self.post_to_peer(CommandKind::ActivateWrite {
        pipe: self.peer_id,
        msgs_read: self.msgs_read,
      });
    }
    Some(msg)
  }

  // --- Write side ---

  /// Whether one more message fits. Continuation frames of a multipart
  /// message are always accepted; only the first frame is bounded by the
  /// high-water-mark.
  pub fn check_write(&self) -> bool {
    if self.state != PipeState::Active {
      return false;
    }
    self.out_more || self.msgs_written - self.peers_msgs_read < self.out_hwm
  }

  /// Appends one message. On refusal the message is handed back intact;
  /// the producer is refused, never lossy.
  pub fn write(&mut self, msg: Msg) -> Result<(), Msg> {
    if !self.check_write() {
      return Err(msg);
    }
    self.out_more = msg.is_more();
    self.out_q.queue.push(msg);
    self.msgs_written += 1;
    Ok(())
  }

  /// Makes written messages visible to the peer, waking it if it sleeps.
  /// Called once per batch (at the final frame of a logical message).
  pub fn flush(&mut self) {
    if self.out_q.reader_sleeping.swap(false, Ordering::SeqCst) {
      self.post_to_peer(CommandKind::ActivateRead { pipe: self.peer_id });
    }
  }

  // --- Command processing (invoked by the owning object) ---

  /// Peer reader reported progress. Returns true when this unblocked a
  /// previously full outbound direction.
  pub fn process_activate_write(&mut self, msgs_read: u64) -> bool {
    let was_full = !self.check_write();
    if msgs_read > self.peers_msgs_read {
      self.peers_msgs_read = msgs_read;
    }
    was_full && self.check_write()
  }

  // --- Termination handshake ---

  /// Initiates the two-phase shutdown by sending `PipeTerm` to the peer.
  pub fn terminate(&mut self) {
    if self.state != PipeState::Active {
      return;
    }
    self.state = PipeState::TermSent;
    self.post_to_peer(CommandKind::PipeTerm { pipe: self.peer_id });
  }

  /// Acknowledges a received `PipeTerm`; the pipe is dead afterwards.
  pub fn ack_term(&mut self) {
    self.post_to_peer(CommandKind::PipeTermAck { pipe: self.peer_id });
    self.state = PipeState::Terminated;
  }

  /// Marks the handshake we initiated as complete.
  pub fn term_acked(&mut self) {
    self.state = PipeState::Terminated;
  }

  /// Nudges the peer to re-examine both directions after an engine swap.
  pub fn hiccup(&mut self) {
    self.post_to_peer(CommandKind::Hiccup { pipe: self.peer_id });
  }
}

impl std::fmt::Debug for Pipe {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipe")
      .field("local_id", &self.local_id)
      .field("peer_id", &self.peer_id)
      .field("state", &self.state)
      .field("msgs_written", &self.msgs_written)
      .field("msgs_read", &self.msgs_read)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::mailbox::mailbox;
  use std::time::Duration;

  fn wired_pair(hwm: usize) -> (Pipe, Pipe, crate::runtime::mailbox::Mailbox, crate::runtime::mailbox::Mailbox) {
    let (tx_a, rx_a) = mailbox().unwrap(); // owner of end A listens here
    let (tx_b, rx_b) = mailbox().unwrap();
    let (mut a, mut b) = Pipe::pair(10, 11, hwm, hwm);
    a.set_peer(2, tx_b); // commands from A go to B's owner
    b.set_peer(1, tx_a);
    (a, b, rx_a, rx_b)
  }

  #[test]
  fn messages_flow_in_order() {
    let (mut a, mut b, _rx_a, _rx_b) = wired_pair(100);
    for i in 0..50u8 {
      a.write(Msg::from_vec(vec![i])).unwrap();
    }
    a.flush();
    for i in 0..50u8 {
      let msg = b.read().expect("message missing");
      assert_eq!(msg.data().unwrap(), &[i]);
    }
    assert!(b.read().is_none());
  }

  #[test]
  fn writer_refused_above_hwm() {
    let (mut a, mut b, _rx_a, _rx_b) = wired_pair(4);
    for i in 0..4u8 {
      a.write(Msg::from_vec(vec![i])).unwrap();
    }
    // Fifth write is refused and the message is handed back intact.
    let refused = a.write(Msg::from_vec(vec![9])).unwrap_err();
    assert_eq!(refused.data().unwrap(), &[9]);

    // Reader progress past the LWM restores writability.
    let mut reported = 0;
    for _ in 0..2 {
      b.read().unwrap();
      reported = 2;
    }
    assert!(a.process_activate_write(reported));
    a.write(refused).unwrap();
  }

  #[test]
  fn flush_wakes_sleeping_reader() {
    let (mut a, mut b, _rx_a, mut rx_b) = wired_pair(10);
    // Reader finds nothing and goes to sleep.
    assert!(b.read().is_none());
    a.write(Msg::from_static(b"wake")).unwrap();
    a.flush();
    let cmd = rx_b.recv(Some(Duration::from_millis(200))).unwrap().unwrap();
    assert_eq!(cmd.dest, 2);
    assert!(matches!(cmd.kind, CommandKind::ActivateRead { pipe: 11 }));
    assert_eq!(b.read().unwrap().data().unwrap(), b"wake");
  }

  #[test]
  fn no_wakeup_for_awake_reader() {
    let (mut a, _b, _rx_a, mut rx_b) = wired_pair(10);
    a.write(Msg::from_static(b"x")).unwrap();
    a.flush();
    // Reader never slept, so no command crosses.
    assert!(rx_b.recv(Some(Duration::from_millis(50))).unwrap().is_none());
  }

  #[test]
  fn lwm_report_crosses_to_writer_owner() {
    let (mut a, mut b, mut rx_a, _rx_b) = wired_pair(4); // lwm = 2
    for i in 0..4u8 {
      a.write(Msg::from_vec(vec![i])).unwrap();
    }
    a.flush();
    b.read().unwrap();
    b.read().unwrap(); // crosses lwm -> report
    let cmd = rx_a.recv(Some(Duration::from_millis(200))).unwrap().unwrap();
    assert_eq!(cmd.dest, 1);
    match cmd.kind {
      CommandKind::ActivateWrite { pipe, msgs_read } => {
        assert_eq!(pipe, 10);
        assert_eq!(msgs_read, 2);
      }
      _ => panic!("expected ActivateWrite"),
    }
  }

  #[test]
  fn termination_handshake() {
    let (mut a, mut b, mut rx_a, mut rx_b) = wired_pair(10);
    a.terminate();
    assert_eq!(a.state(), PipeState::TermSent);
    // A no longer accepts writes.
    assert!(a.write(Msg::new()).is_err());

    let cmd = rx_b.recv(Some(Duration::from_millis(200))).unwrap().unwrap();
    assert!(matches!(cmd.kind, CommandKind::PipeTerm { pipe: 11 }));
    b.ack_term();
    assert_eq!(b.state(), PipeState::Terminated);

    let cmd = rx_a.recv(Some(Duration::from_millis(200))).unwrap().unwrap();
    assert!(matches!(cmd.kind, CommandKind::PipeTermAck { pipe: 10 }));
    a.term_acked();
    assert_eq!(a.state(), PipeState::Terminated);
  }
}
