// src/runtime/signaler.rs

//! A one-slot, edge-triggered wakeup primitive built on a self-pipe.
//!
//! This is the only cross-thread wakeup mechanism in the library. The read
//! end can be registered with an external multiplexer via `fd()`, which is
//! how a reactor sleeps on both its transport handles and its mailbox with
//! a single poll call.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

const WAIT_TOKEN: Token = Token(0);

/// Consumer-side wait machinery: a private poller dedicated to this
/// signaler's read end, so `wait` never touches the owner's multiplexer.
struct WaitSet {
  poll: Poll,
  events: Events,
}

pub(crate) struct Signaler {
  w: UnixStream,
  r: UnixStream,
  wait_set: Mutex<WaitSet>,
}

impl Signaler {
  pub fn new() -> io::Result<Self> {
    let (w, r) = UnixStream::pair()?;
    w.set_nonblocking(true)?;
    r.set_nonblocking(true)?;

    let poll = Poll::new()?;
    poll
      .registry()
      .register(&mut SourceFd(&r.as_raw_fd()), WAIT_TOKEN, Interest::READABLE)?;

    Ok(Self {
      w,
      r,
      wait_set: Mutex::new(WaitSet {
        poll,
        events: Events::with_capacity(1),
      }),
    })
  }

  /// Raw descriptor of the read end, for registration with an external
  /// multiplexer.
  pub fn fd(&self) -> RawFd {
    self.r.as_raw_fd()
  }

  /// Posts one edge: writes exactly one byte to the pipe.
  ///
  /// Zero-byte writes and interruptions are retried. A full pipe means the
  /// consumer already has unconsumed edges pending, which is as good as
  /// delivered. Any other I/O failure is fatal to the owning component.
  pub fn send(&self) -> io::Result<()> {
    loop {
      match (&self.w).write(&[0u8]) {
        Ok(0) => continue,
        Ok(_) => return Ok(()),
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
          tracing::warn!("signaler pipe full; edge already pending");
          return Ok(());
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Consumes one edge: reads exactly one byte from the pipe.
  ///
  /// Must only be called after `wait` reported readiness. Interruptions are
  /// retried so an edge is never lost to a spurious signal.
  pub fn recv(&self) -> io::Result<()> {
    let mut buf = [0u8; 1];
    loop {
      match (&self.r).read(&mut buf) {
        Ok(_) => return Ok(()),
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) => return Err(e),
      }
    }
  }

  /// Consumes one edge if present, without blocking. Returns whether an
  /// edge was actually consumed.
  pub fn recv_failable(&self) -> io::Result<bool> {
    let mut buf = [0u8; 1];
    loop {
      match (&self.r).read(&mut buf) {
        Ok(0) => return Ok(false),
        Ok(_) => return Ok(true),
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
        Err(e) => return Err(e),
      }
    }
  }

  /// Waits for an unconsumed edge.
  ///
  /// `None` blocks until readiness, `Some(0)` polls, `Some(t)` bounds the
  /// wait. Returns `true` if an edge is present, `false` on timeout.
  /// Spurious wakeups are retried with the deadline recomputed.
  pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut ws = self.wait_set.lock();

    loop {
      let remaining = match deadline {
        None => None,
        Some(d) => {
          let now = Instant::now();
          if now >= d {
            // Deadline already passed: one final non-blocking check.
            Some(Duration::ZERO)
          } else {
            Some(d - now)
          }
        }
      };

      let ws = &mut *ws;
      match ws.poll.poll(&mut ws.events, remaining) {
        Ok(()) => {}
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }

      if !ws.events.is_empty() {
        return Ok(true);
      }
      // No events: either a timeout or a spurious wake.
      if let Some(d) = deadline {
        if Instant::now() >= d {
          return Ok(false);
        }
      }
    }
  }
}

impl std::fmt::Debug for Signaler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Signaler").field("fd", &self.fd()).finish()
  }
}
