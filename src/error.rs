use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ZmqError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Timeouts ---
  #[error("Operation timed out")]
  Timeout,

  // --- Connection/Binding Errors ---
  #[error("Address already in use: {0}")]
  AddrInUse(String),
  #[error("Address not available: {0}")]
  AddrNotAvailable(String),
  #[error("Connection refused by peer: {0}")]
  ConnectionRefused(String),
  #[error("Host is unreachable: {0}")]
  HostUnreachable(String),
  #[error("Connection closed by peer or transport")]
  ConnectionClosed,
  #[error("Permission denied for endpoint: {0}")]
  PermissionDenied(String),

  // --- Endpoint Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),

  // --- Option Errors ---
  #[error("Invalid socket option ID: {0}")]
  InvalidOption(i32),
  #[error("Invalid value provided for option ID {0}")]
  InvalidOptionValue(i32),

  // --- State Errors ---
  #[error("Operation is invalid for the socket type ({0})")]
  InvalidSocketType(&'static str),
  #[error("Operation is invalid for the current socket state: {0}")]
  InvalidState(&'static str),
  #[error("Context is terminating")]
  ContextTerminated,

  // --- Protocol Errors ---
  #[error("ZMTP protocol violation: {0}")]
  ProtocolViolation(String),
  #[error("Invalid message format for operation: {0}")]
  InvalidMessage(String),

  // --- Resource Limits ---
  #[error("Resource limit reached (e.g., HWM)")]
  ResourceLimitReached,

  // --- Unsupported ---
  #[error("Transport scheme not supported or enabled: {0}")]
  UnsupportedTransport(String),
  #[error("Socket option not supported: {0}")]
  UnsupportedOption(i32),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl ZmqError {
  /// Maps common `std::io::Error` kinds to endpoint-aware variants.
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => ZmqError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::AddrNotAvailable => ZmqError::AddrNotAvailable(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => ZmqError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::PermissionDenied => ZmqError::PermissionDenied(endpoint.to_string()),
      io::ErrorKind::TimedOut => ZmqError::Timeout,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => ZmqError::ConnectionClosed,
      _ => ZmqError::Io(e),
    }
  }

  /// Returns the libzmq-compatible errno for this error.
  ///
  /// Values follow the reference library so callers ported from libzmq can
  /// keep their errno-based handling.
  pub fn errno(&self) -> i32 {
    const EAGAIN: i32 = 11;
    const EINVAL: i32 = 22;
    const ENOTSUP: i32 = 95;
    const ECONNREFUSED: i32 = 111;
    const EHOSTUNREACH: i32 = 113;
    // libzmq private error space (ZMQ_HAUSNUMERO = 156384712).
    const EFSM: i32 = 156384712 + 51;
    const ETERM: i32 = 156384712 + 53;
    const EPROTO: i32 = 156384712 + 2; // ENOCOMPATPROTO neighbourhood

    match self {
      ZmqError::ResourceLimitReached | ZmqError::Timeout => EAGAIN,
      ZmqError::InvalidState(_) => EFSM,
      ZmqError::ContextTerminated => ETERM,
      ZmqError::HostUnreachable(_) => EHOSTUNREACH,
      ZmqError::ConnectionRefused(_) => ECONNREFUSED,
      ZmqError::ProtocolViolation(_) | ZmqError::InvalidMessage(_) => EPROTO,
      ZmqError::UnsupportedTransport(_) | ZmqError::UnsupportedOption(_) => ENOTSUP,
      _ => EINVAL,
    }
  }
}
