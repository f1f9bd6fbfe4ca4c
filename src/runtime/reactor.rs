// src/runtime/reactor.rs

//! The I/O thread: a readiness loop dispatching transport events, expiring
//! timers and inbound mailbox commands to the objects it owns.
//!
//! The reactor is the sole owner of its objects; everything else refers to
//! them by `ObjectId`. Registration operations are only reachable through
//! the [`IoContext`] handed into callbacks, which confines them to the
//! reactor's own thread. Cross-thread work arrives exclusively as commands.

use crate::error::ZmqError;
use crate::runtime::command::{Command, CommandKind, ObjectId, REACTOR_DEST};
use crate::runtime::mailbox::{mailbox, Mailbox, MailboxSender};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use std::collections::{BTreeMap, HashMap};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAILBOX_TOKEN: Token = Token(REACTOR_DEST);
const EVENTS_CAPACITY: usize = 256;

/// Capability set of a reactor-owned pollable object.
pub(crate) trait IoObject: Send {
  /// Called once, on the reactor thread, when the object enters the
  /// registry. Registers handles and timers.
  fn plug(&mut self, ctx: &mut IoContext);

  fn on_readable(&mut self, _ctx: &mut IoContext) {}

  fn on_writable(&mut self, _ctx: &mut IoContext) {}

  fn on_timer(&mut self, _timer_id: u64, _ctx: &mut IoContext) {}

  fn on_command(&mut self, _kind: CommandKind, _ctx: &mut IoContext) {}

  /// Called exactly once on removal (retire, or reactor teardown). Must
  /// release handles on every exit path.
  fn unplug(&mut self, _ctx: &mut IoContext) {}
}

enum ReactorOp {
  Add(ObjectId, Box<dyn IoObject + Send>),
  Remove(ObjectId),
}

/// Reactor-thread services available inside object callbacks.
pub(crate) struct IoContext<'a> {
  /// Registration surface for mio event sources.
  pub registry: &'a Registry,
  /// Sender addressing this reactor's own mailbox (for sibling commands).
  pub sender: &'a MailboxSender,
  /// Id of the object currently being dispatched.
  pub id: ObjectId,
  timers: &'a mut TimerSet,
  ops: &'a mut Vec<ReactorOp>,
}

impl IoContext<'_> {
  /// The mio token under which the current object registers its handle.
  pub fn token(&self) -> Token {
    Token(self.id)
  }

  pub fn add_timer(&mut self, after: Duration, timer_id: u64) {
    self.timers.add(Instant::now() + after, self.id, timer_id);
  }

  pub fn cancel_timer(&mut self, timer_id: u64) {
    self.timers.cancel(self.id, timer_id);
  }

  /// Schedules a sibling object for insertion; its `plug` runs after the
  /// current dispatch completes.
  pub fn add_object(&mut self, id: ObjectId, object: Box<dyn IoObject + Send>) {
    self.ops.push(ReactorOp::Add(id, object));
  }

  /// Schedules the current object for removal; `unplug` runs after the
  /// current dispatch completes and the object is dropped.
  pub fn retire(&mut self) {
    self.ops.push(ReactorOp::Remove(self.id));
  }

  /// Posts a command to a sibling object on this reactor.
  pub fn send_command(&self, dest: ObjectId, kind: CommandKind) {
    let _ = self.sender.send(Command { dest, kind });
  }
}

/// Sorted `(deadline, object, timer)` entries.
struct TimerSet {
  entries: BTreeMap<(Instant, u64), (ObjectId, u64)>,
  seq: u64,
}

impl TimerSet {
  fn new() -> Self {
    Self {
      entries: BTreeMap::new(),
      seq: 0,
    }
  }

  fn add(&mut self, deadline: Instant, object: ObjectId, timer_id: u64) {
    self.seq += 1;
    self.entries.insert((deadline, self.seq), (object, timer_id));
  }

  fn cancel(&mut self, object: ObjectId, timer_id: u64) {
    self
      .entries
      .retain(|_, &mut (obj, tid)| !(obj == object && tid == timer_id));
  }

  fn cancel_all(&mut self, object: ObjectId) {
    self.entries.retain(|_, &mut (obj, _)| obj != object);
  }

  fn next_deadline(&self) -> Option<Instant> {
    self.entries.keys().next().map(|&(deadline, _)| deadline)
  }

  fn take_expired(&mut self, now: Instant) -> Vec<(ObjectId, u64)> {
    let mut fired = Vec::new();
    while let Some((&key, _)) = self.entries.iter().next() {
      if key.0 > now {
        break;
      }
      if let Some(entry) = self.entries.remove(&key) {
        fired.push(entry);
      }
    }
    fired
  }
}

/// Handle kept by the context: the reactor's mailbox plus its thread.
pub(crate) struct ReactorHandle {
  pub sender: MailboxSender,
  thread: Option<JoinHandle<()>>,
}

impl ReactorHandle {
  /// Sends `Stop` and joins the thread. Idempotent.
  pub fn stop_and_join(&mut self) {
    if let Some(thread) = self.thread.take() {
      let _ = self.sender.send(Command {
        dest: REACTOR_DEST,
        kind: CommandKind::Stop,
      });
      if thread.join().is_err() {
        tracing::error!("reactor thread panicked");
      }
    }
  }
}

impl Drop for ReactorHandle {
  fn drop(&mut self) {
    self.stop_and_join();
  }
}

pub(crate) struct Reactor {
  name: String,
  poll: Poll,
  events: Events,
  mailbox: Mailbox,
  sender: MailboxSender,
  objects: HashMap<ObjectId, Box<dyn IoObject + Send>>,
  timers: TimerSet,
  ops: Vec<ReactorOp>,
  stopping: bool,
}

impl Reactor {
  /// Spawns a reactor thread and returns its handle.
  pub fn spawn(name: String) -> Result<ReactorHandle, ZmqError> {
    let (sender, rx_mailbox) = mailbox()?;
    let poll = Poll::new()?;
    poll.registry().register(
      &mut SourceFd(&rx_mailbox.fd()),
      MAILBOX_TOKEN,
      Interest::READABLE,
    )?;

    let handle_sender = sender.clone();
    let thread_name = name.clone();
    let thread = std::thread::Builder::new()
      .name(thread_name)
      .spawn(move || {
        let reactor = Reactor {
          name,
          poll,
          events: Events::with_capacity(EVENTS_CAPACITY),
          mailbox: rx_mailbox,
          sender,
          objects: HashMap::new(),
          timers: TimerSet::new(),
          ops: Vec::new(),
          stopping: false,
        };
        reactor.run();
      })
      .map_err(ZmqError::Io)?;

    Ok(ReactorHandle {
      sender: handle_sender,
      thread: Some(thread),
    })
  }

  fn run(mut self) {
    tracing::debug!(reactor = %self.name, "reactor thread started");
    loop {
      let timeout = self
        .timers
        .next_deadline()
        .map(|deadline| deadline.saturating_duration_since(Instant::now()));

      match self.poll.poll(&mut self.events, timeout) {
        Ok(()) => {}
        Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => {
          tracing::error!(reactor = %self.name, error = %e, "poll failed; stopping reactor");
          self.stopping = true;
        }
      }

      let ready: Vec<(Token, bool, bool)> = self
        .events
        .iter()
        .map(|ev| (ev.token(), ev.is_readable(), ev.is_writable()))
        .collect();

      for (token, readable, writable) in ready {
        if token == MAILBOX_TOKEN {
          self.drain_commands();
        } else {
          let id = token.0;
          if readable {
            self.dispatch(id, |object, ctx| object.on_readable(ctx));
          }
          if writable {
            self.dispatch(id, |object, ctx| object.on_writable(ctx));
          }
        }
      }

      for (object, timer_id) in self.timers.take_expired(Instant::now()) {
        self.dispatch(object, |obj, ctx| obj.on_timer(timer_id, ctx));
      }

      self.apply_ops();

      if self.stopping {
        self.teardown();
        break;
      }
    }
    tracing::debug!(reactor = %self.name, "reactor thread finished");
  }

  fn drain_commands(&mut self) {
    loop {
      let cmd = match self.mailbox.recv(Some(Duration::ZERO)) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => break,
        Err(e) => {
          tracing::error!(reactor = %self.name, error = %e, "mailbox failure; stopping reactor");
          self.stopping = true;
          break;
        }
      };

      tracing::trace!(reactor = %self.name, dest = cmd.dest, command = cmd.variant_name(), "reactor command");
      match cmd.kind {
        CommandKind::Stop if cmd.dest == REACTOR_DEST => {
          self.stopping = true;
        }
        CommandKind::Plug { object } => {
          // Inserted immediately so commands queued right behind the plug
          // (e.g. an engine attach) find their target.
          self.insert_object(cmd.dest, object);
        }
        kind => {
          let known = self.objects.contains_key(&cmd.dest);
          if known {
            self.dispatch(cmd.dest, |object, ctx| object.on_command(kind, ctx));
          } else {
            tracing::trace!(reactor = %self.name, dest = cmd.dest, "command for retired object dropped");
          }
        }
      }
    }
  }

  fn dispatch<F>(&mut self, id: ObjectId, f: F)
  where
    F: FnOnce(&mut (dyn IoObject + Send), &mut IoContext),
  {
    let Self {
      poll,
      sender,
      objects,
      timers,
      ops,
      ..
    } = self;
    let Some(object) = objects.get_mut(&id) else {
      return;
    };
    let mut ctx = IoContext {
      registry: poll.registry(),
      sender,
      id,
      timers,
      ops,
    };
    f(object.as_mut(), &mut ctx);
  }

  fn insert_object(&mut self, id: ObjectId, mut object: Box<dyn IoObject + Send>) {
    {
      let Self {
        poll,
        sender,
        timers,
        ops,
        ..
      } = self;
      let mut ctx = IoContext {
        registry: poll.registry(),
        sender,
        id,
        timers,
        ops,
      };
      object.plug(&mut ctx);
    }
    self.objects.insert(id, object);
  }

  fn remove_object(&mut self, id: ObjectId) {
    let Some(mut object) = self.objects.remove(&id) else {
      return;
    };
    {
      let Self {
        poll,
        sender,
        timers,
        ops,
        ..
      } = self;
      let mut ctx = IoContext {
        registry: poll.registry(),
        sender,
        id,
        timers,
        ops,
      };
      object.unplug(&mut ctx);
    }
    self.timers.cancel_all(id);
  }

  fn apply_ops(&mut self) {
    while !self.ops.is_empty() {
      let ops = std::mem::take(&mut self.ops);
      for op in ops {
        match op {
          ReactorOp::Add(id, object) => self.insert_object(id, object),
          ReactorOp::Remove(id) => self.remove_object(id),
        }
      }
    }
  }

  fn teardown(&mut self) {
    let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
    if !ids.is_empty() {
      tracing::debug!(reactor = %self.name, count = ids.len(), "tearing down remaining objects");
    }
    for id in ids {
      self.remove_object(id);
    }
    self.apply_ops();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;

  /// Records its lifecycle callbacks into an mpsc channel.
  struct Probe {
    report: mpsc::Sender<&'static str>,
    retire_on_term: bool,
  }

  impl IoObject for Probe {
    fn plug(&mut self, ctx: &mut IoContext) {
      self.report.send("plug").unwrap();
      ctx.add_timer(Duration::from_millis(20), 7);
    }

    fn on_timer(&mut self, timer_id: u64, _ctx: &mut IoContext) {
      assert_eq!(timer_id, 7);
      self.report.send("timer").unwrap();
    }

    fn on_command(&mut self, kind: CommandKind, ctx: &mut IoContext) {
      if matches!(kind, CommandKind::Term) {
        self.report.send("term").unwrap();
        if self.retire_on_term {
          ctx.retire();
        }
      }
    }

    fn unplug(&mut self, _ctx: &mut IoContext) {
      self.report.send("unplug").unwrap();
    }
  }

  #[test]
  fn plug_timer_command_retire_cycle() {
    let mut handle = Reactor::spawn("test-reactor".into()).unwrap();
    let (report_tx, report_rx) = mpsc::channel();

    handle
      .sender
      .send(Command {
        dest: 1,
        kind: CommandKind::Plug {
          object: Box::new(Probe {
            report: report_tx,
            retire_on_term: true,
          }),
        },
      })
      .unwrap();

    assert_eq!(report_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "plug");
    assert_eq!(report_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "timer");

    handle
      .sender
      .send(Command {
        dest: 1,
        kind: CommandKind::Term,
      })
      .unwrap();
    assert_eq!(report_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "term");
    assert_eq!(report_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "unplug");

    handle.stop_and_join();
  }

  #[test]
  fn stop_tears_down_remaining_objects() {
    let mut handle = Reactor::spawn("test-reactor-2".into()).unwrap();
    let (report_tx, report_rx) = mpsc::channel();

    handle
      .sender
      .send(Command {
        dest: 1,
        kind: CommandKind::Plug {
          object: Box::new(Probe {
            report: report_tx,
            retire_on_term: false,
          }),
        },
      })
      .unwrap();
    assert_eq!(report_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "plug");

    handle.stop_and_join();
    // The object was unplugged during reactor teardown.
    let mut saw_unplug = false;
    while let Ok(event) = report_rx.try_recv() {
      if event == "unplug" {
        saw_unplug = true;
      }
    }
    assert!(saw_unplug);
  }

  #[test]
  fn command_for_unknown_object_is_dropped() {
    let mut handle = Reactor::spawn("test-reactor-3".into()).unwrap();
    handle
      .sender
      .send(Command {
        dest: 999,
        kind: CommandKind::Term,
      })
      .unwrap();
    // Nothing to assert beyond "the reactor survives".
    handle.stop_and_join();
  }
}
