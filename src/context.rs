// src/context.rs

//! The context: owns the reactor threads, the object-id source, the inproc
//! rendezvous table and the open-socket count. `term()` completes only
//! when every socket has closed, every reactor thread has exited and every
//! transport handle is gone.

use crate::error::ZmqError;
use crate::runtime::mailbox::MailboxSender;
use crate::runtime::reactor::{Reactor, ReactorHandle};
use crate::socket::{create_socket, Socket, SocketType};
use crate::transport::inproc::InprocBinding;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Allocates object ids, unique for the lifetime of the context and never
/// reused. Id zero is reserved for reactor-level commands.
pub(crate) struct IdSource {
  next: AtomicUsize,
}

impl IdSource {
  fn new() -> Self {
    Self {
      next: AtomicUsize::new(1),
    }
  }

  pub fn next(&self) -> usize {
    self.next.fetch_add(1, Ordering::Relaxed)
  }
}

struct ContextInner {
  ids: Arc<IdSource>,
  reactors: Mutex<Vec<ReactorHandle>>,
  reactor_senders: Vec<MailboxSender>,
  next_reactor: AtomicUsize,
  inproc: Mutex<HashMap<String, InprocBinding>>,
  open_sockets: Mutex<usize>,
  sockets_done: Condvar,
  terminating: AtomicBool,
}

/// The entry point for creating sockets. Cheap to clone; all clones refer
/// to the same reactors and registries.
#[derive(Clone)]
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  /// Creates a context with one I/O thread.
  pub fn new() -> Result<Self, ZmqError> {
    Self::with_io_threads(1)
  }

  /// Creates a context with `io_threads` reactor threads. Sessions are
  /// assigned round-robin and stay on their reactor for life.
  pub fn with_io_threads(io_threads: usize) -> Result<Self, ZmqError> {
    let io_threads = io_threads.max(1);
    let mut reactors = Vec::with_capacity(io_threads);
    let mut reactor_senders = Vec::with_capacity(io_threads);
    for index in 0..io_threads {
      let handle = Reactor::spawn(format!("pzmq-io-{}", index))?;
      reactor_senders.push(handle.sender.clone());
      reactors.push(handle);
    }

    Ok(Self {
      inner: Arc::new(ContextInner {
        ids: Arc::new(IdSource::new()),
        reactors: Mutex::new(reactors),
        reactor_senders,
        next_reactor: AtomicUsize::new(0),
        inproc: Mutex::new(HashMap::new()),
        open_sockets: Mutex::new(0),
        sockets_done: Condvar::new(),
        terminating: AtomicBool::new(false),
      }),
    })
  }

  /// Creates a socket of the given type.
  pub fn socket(&self, socket_type: SocketType) -> Result<Socket, ZmqError> {
    if self.inner.terminating.load(Ordering::SeqCst) {
      return Err(ZmqError::ContextTerminated);
    }
    *self.inner.open_sockets.lock() += 1;
    match create_socket(self.clone(), socket_type) {
      Ok(socket) => Ok(socket),
      Err(e) => {
        self.socket_closed();
        Err(e)
      }
    }
  }

  /// Begins shutdown and blocks until it completes: waits for every socket
  /// to finish closing, then stops and joins all reactor threads.
  pub fn term(&self) -> Result<(), ZmqError> {
    self.inner.terminating.store(true, Ordering::SeqCst);

    {
      let mut open = self.inner.open_sockets.lock();
      while *open > 0 {
        self.inner.sockets_done.wait(&mut open);
      }
    }

    let mut reactors = std::mem::take(&mut *self.inner.reactors.lock());
    for handle in &mut reactors {
      handle.stop_and_join();
    }
    tracing::debug!("context terminated");
    Ok(())
  }

  // --- Internal services ---

  pub(crate) fn ids(&self) -> &IdSource {
    &self.inner.ids
  }

  pub(crate) fn ids_arc(&self) -> Arc<IdSource> {
    self.inner.ids.clone()
  }

  /// Round-robin choice of reactor for a new listener or session.
  pub(crate) fn pick_reactor(&self) -> MailboxSender {
    let index = self.inner.next_reactor.fetch_add(1, Ordering::Relaxed);
    self.inner.reactor_senders[index % self.inner.reactor_senders.len()].clone()
  }

  pub(crate) fn register_inproc(&self, name: &str, binding: InprocBinding) -> Result<(), ZmqError> {
    let mut registry = self.inner.inproc.lock();
    if registry.contains_key(name) {
      return Err(ZmqError::AddrInUse(format!("inproc://{}", name)));
    }
    registry.insert(name.to_string(), binding);
    Ok(())
  }

  pub(crate) fn unregister_inproc(&self, name: &str) {
    self.inner.inproc.lock().remove(name);
  }

  pub(crate) fn lookup_inproc(&self, name: &str) -> Option<InprocBinding> {
    self.inner.inproc.lock().get(name).cloned()
  }

  pub(crate) fn socket_closed(&self) {
    let mut open = self.inner.open_sockets.lock();
    *open = open.saturating_sub(1);
    if *open == 0 {
      self.inner.sockets_done.notify_all();
    }
  }
}

impl std::fmt::Debug for Context {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Context")
      .field("io_threads", &self.inner.reactor_senders.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn term_with_no_sockets_stops_reactors() {
    let ctx = Context::with_io_threads(2).unwrap();
    ctx.term().unwrap();
    // Reactor handles are consumed; a second term is a no-op.
    ctx.term().unwrap();
  }

  #[test]
  fn socket_creation_fails_after_term_begins() {
    let ctx = Context::new().unwrap();
    ctx.term().unwrap();
    assert!(matches!(
      ctx.socket(SocketType::Push),
      Err(ZmqError::ContextTerminated)
    ));
  }
}
