// src/transport/tcp.rs

//! The TCP listener object and stream option plumbing.
//!
//! Binding happens synchronously on the caller's thread so bind errors and
//! the resolved wildcard port surface immediately; the non-blocking
//! listener is then shipped to a reactor where the accept loop runs.

use crate::context::IdSource;
use crate::engine::ZmtpEngine;
use crate::error::ZmqError;
use crate::runtime::command::{Command, CommandKind, ObjectId};
use crate::runtime::mailbox::MailboxSender;
use crate::runtime::reactor::{IoContext, IoObject};
use crate::session::SessionBase;
use crate::socket::options::SessionOptions;
use mio::net::{TcpListener as MioTcpListener, TcpStream};
use mio::Interest;
use socket2::{Domain, Protocol, SockRef, Socket as Socket2, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;

/// Applies nodelay and keepalive settings from the socket options.
pub(crate) fn apply_tcp_socket_options<S: AsRawFd>(
  stream: &S,
  options: &SessionOptions,
) -> std::io::Result<()> {
  let fd = unsafe { BorrowedFd::borrow_raw(stream.as_raw_fd()) };
  let sock = SockRef::from(&fd);
  sock.set_nodelay(options.tcp_nodelay)?;

  match options.tcp_keepalive_enabled {
    1 => {
      let mut keepalive = TcpKeepalive::new();
      if let Some(idle) = options.tcp_keepalive_idle {
        keepalive = keepalive.with_time(idle);
      }
      if let Some(interval) = options.tcp_keepalive_interval {
        keepalive = keepalive.with_interval(interval);
      }
      sock.set_tcp_keepalive(&keepalive)?;
    }
    -1 => sock.set_keepalive(false)?,
    _ => {} // 0: leave the system default alone
  }
  Ok(())
}

pub(crate) struct TcpListener {
  id: ObjectId,
  listener: MioTcpListener,
  endpoint: String,
  socket_id: ObjectId,
  socket_mailbox: MailboxSender,
  options: SessionOptions,
  ids: Arc<IdSource>,
}

impl TcpListener {
  /// Binds synchronously and returns the listener object plus the actual
  /// local address (resolving a port-zero bind).
  pub fn bind(
    id: ObjectId,
    addr: SocketAddr,
    endpoint: String,
    socket_id: ObjectId,
    socket_mailbox: MailboxSender,
    options: SessionOptions,
    ids: Arc<IdSource>,
  ) -> Result<(Self, SocketAddr), ZmqError> {
    let domain = Domain::for_address(addr);
    let sock = Socket2::new(domain, Type::STREAM, Some(Protocol::TCP))
      .map_err(|e| ZmqError::from_io_endpoint(e, &endpoint))?;
    sock
      .set_reuse_address(true)
      .map_err(|e| ZmqError::from_io_endpoint(e, &endpoint))?;
    sock
      .bind(&addr.into())
      .map_err(|e| ZmqError::from_io_endpoint(e, &endpoint))?;
    sock
      .listen(128)
      .map_err(|e| ZmqError::from_io_endpoint(e, &endpoint))?;
    sock
      .set_nonblocking(true)
      .map_err(|e| ZmqError::from_io_endpoint(e, &endpoint))?;

    let std_listener: std::net::TcpListener = sock.into();
    let local_addr = std_listener
      .local_addr()
      .map_err(|e| ZmqError::from_io_endpoint(e, &endpoint))?;
    let listener = MioTcpListener::from_std(std_listener);
    tracing::info!(listener = id, %local_addr, "TCP listener bound");

    Ok((
      Self {
        id,
        listener,
        endpoint,
        socket_id,
        socket_mailbox,
        options,
        ids,
      },
      local_addr,
    ))
  }

  fn accept_connection(&mut self, stream: TcpStream, peer_addr: SocketAddr, ctx: &mut IoContext) {
    tracing::debug!(listener = self.id, %peer_addr, "accepted TCP connection");

    if let Err(e) = apply_tcp_socket_options(&stream, &self.options) {
      tracing::warn!(listener = self.id, %peer_addr, error = %e, "failed to apply TCP options");
    }

    let session_id = self.ids.next();
    let endpoint_uri = format!("tcp://{}", peer_addr);
    let session = SessionBase::new_accepted(
      session_id,
      endpoint_uri,
      self.socket_id,
      self.socket_mailbox.clone(),
      self.options.clone(),
      self.ids.clone(),
    );
    let engine = ZmtpEngine::new(stream, &self.options);

    // Announce ownership first so the socket can reap the session even if
    // it closes before the handshake finishes.
    let _ = self.socket_mailbox.send(Command {
      dest: self.socket_id,
      kind: CommandKind::Own {
        object: session_id,
        mailbox: ctx.sender.clone(),
      },
    });
    ctx.add_object(session_id, Box::new(session));
    ctx.send_command(
      session_id,
      CommandKind::Attach {
        engine: Box::new(engine),
      },
    );
  }
}

impl IoObject for TcpListener {
  fn plug(&mut self, ctx: &mut IoContext) {
    if let Err(e) = ctx
      .registry
      .register(&mut self.listener, ctx.token(), Interest::READABLE)
    {
      tracing::error!(listener = self.id, error = %e, "listener registration failed");
    }
    tracing::debug!(listener = self.id, endpoint = %self.endpoint, "listener plugged");
  }

  fn on_readable(&mut self, ctx: &mut IoContext) {
    loop {
      match self.listener.accept() {
        Ok((stream, peer_addr)) => self.accept_connection(stream, peer_addr, ctx),
        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
        Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => {
          tracing::error!(listener = self.id, error = %e, "accept failed");
          break;
        }
      }
    }
  }

  fn on_command(&mut self, kind: CommandKind, ctx: &mut IoContext) {
    match kind {
      CommandKind::Term => {
        tracing::debug!(listener = self.id, endpoint = %self.endpoint, "listener received term");
        let _ = self.socket_mailbox.send(Command {
          dest: self.socket_id,
          kind: CommandKind::TermAck { object: self.id },
        });
        ctx.retire();
      }
      other => {
        tracing::warn!(
          listener = self.id,
          command = other.variant_name(),
          "listener received unhandled command"
        );
      }
    }
  }

  fn unplug(&mut self, ctx: &mut IoContext) {
    let _ = ctx.registry.deregister(&mut self.listener);
    tracing::debug!(listener = self.id, endpoint = %self.endpoint, "listener unplugged");
  }
}
