// src/socket/options.rs

use std::time::Duration;

use crate::{Blob, ZmqError};

// Option IDs follow libzmq so callers ported from it keep working.
pub const ROUTING_ID: i32 = 5;
pub const SUBSCRIBE: i32 = 6;
pub const UNSUBSCRIBE: i32 = 7;
pub const LINGER: i32 = 17;
pub const RECONNECT_IVL: i32 = 18;
pub const RECONNECT_IVL_MAX: i32 = 21;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const MAX_MSG_SIZE: i32 = 22;
pub const RCVTIMEO: i32 = 27;
pub const SNDTIMEO: i32 = 28;
pub const TCP_KEEPALIVE: i32 = 34;
pub const TCP_KEEPALIVE_IDLE: i32 = 36;
pub const TCP_KEEPALIVE_INTVL: i32 = 37;

/// Holds parsed and validated socket options.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  // High water marks (applied to pipes).
  pub sndhwm: usize,
  pub rcvhwm: usize,
  // Blocking behaviour of send/recv. `None` blocks forever.
  pub sndtimeo: Option<Duration>,
  pub rcvtimeo: Option<Duration>,
  // Shutdown: `None` lingers forever, `Some(0)` discards immediately.
  pub linger: Option<Duration>,
  // Reconnect backoff for connect-side sessions.
  pub reconnect_ivl: Duration,
  pub reconnect_ivl_max: Option<Duration>,
  // Frame size bound enforced by the decoder. `None` is unlimited.
  pub max_msg_size: Option<u64>,
  // Identity announced to peers during the handshake.
  pub routing_id: Option<Blob>,
  // TCP specifics, applied with socket2 on every stream.
  pub tcp_nodelay: bool,
  pub tcp_keepalive_enabled: i32, // -1 off, 0 system default, 1 on
  pub tcp_keepalive_idle: Option<Duration>,
  pub tcp_keepalive_interval: Option<Duration>,
}

impl Default for SocketOptions {
  fn default() -> Self {
    Self {
      sndhwm: 1000,
      rcvhwm: 1000,
      sndtimeo: None,
      rcvtimeo: None,
      // The reference lingers forever by default; draining in-flight
      // messages on close depends on it.
      linger: None,
      reconnect_ivl: Duration::from_millis(100),
      reconnect_ivl_max: None,
      max_msg_size: None,
      routing_id: None,
      tcp_nodelay: true,
      tcp_keepalive_enabled: 0,
      tcp_keepalive_idle: None,
      tcp_keepalive_interval: None,
    }
  }
}

/// The slice of options a session carries to its reactor.
#[derive(Debug, Clone)]
pub(crate) struct SessionOptions {
  pub sndhwm: usize,
  pub rcvhwm: usize,
  pub reconnect_ivl: Duration,
  pub reconnect_ivl_max: Option<Duration>,
  pub max_msg_size: Option<u64>,
  pub routing_id: Option<Blob>,
  pub socket_type: crate::socket::types::SocketType,
  pub tcp_nodelay: bool,
  pub tcp_keepalive_enabled: i32,
  pub tcp_keepalive_idle: Option<Duration>,
  pub tcp_keepalive_interval: Option<Duration>,
}

impl SocketOptions {
  pub(crate) fn session_options(
    &self,
    socket_type: crate::socket::types::SocketType,
  ) -> SessionOptions {
    SessionOptions {
      sndhwm: self.sndhwm,
      rcvhwm: self.rcvhwm,
      reconnect_ivl: self.reconnect_ivl,
      reconnect_ivl_max: self.reconnect_ivl_max,
      max_msg_size: self.max_msg_size,
      routing_id: self.routing_id.clone(),
      socket_type,
      tcp_nodelay: self.tcp_nodelay,
      tcp_keepalive_enabled: self.tcp_keepalive_enabled,
      tcp_keepalive_idle: self.tcp_keepalive_idle,
      tcp_keepalive_interval: self.tcp_keepalive_interval,
    }
  }

  /// Applies one raw option value. Pattern-specific options (SUBSCRIBE,
  /// UNSUBSCRIBE) are handled by the socket logic, not here.
  pub(crate) fn set(&mut self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    match option {
      SNDHWM => {
        let hwm = parse_i32_option(value)?;
        if hwm < 0 {
          return Err(ZmqError::InvalidOptionValue(option));
        }
        self.sndhwm = hwm as usize;
      }
      RCVHWM => {
        let hwm = parse_i32_option(value)?;
        if hwm < 0 {
          return Err(ZmqError::InvalidOptionValue(option));
        }
        self.rcvhwm = hwm as usize;
      }
      SNDTIMEO => self.sndtimeo = parse_duration_ms_option(value, option)?,
      RCVTIMEO => self.rcvtimeo = parse_duration_ms_option(value, option)?,
      LINGER => self.linger = parse_duration_ms_option(value, option)?,
      RECONNECT_IVL => {
        let ivl = parse_i32_option(value)?;
        if ivl < 0 {
          return Err(ZmqError::InvalidOptionValue(option));
        }
        self.reconnect_ivl = Duration::from_millis(ivl as u64);
      }
      RECONNECT_IVL_MAX => {
        let ivl = parse_i32_option(value)?;
        self.reconnect_ivl_max = match ivl {
          0 => None,
          1.. => Some(Duration::from_millis(ivl as u64)),
          _ => return Err(ZmqError::InvalidOptionValue(option)),
        };
      }
      MAX_MSG_SIZE => {
        let max = parse_i64_option(value)?;
        self.max_msg_size = match max {
          -1 => None,
          0.. => Some(max as u64),
          _ => return Err(ZmqError::InvalidOptionValue(option)),
        };
      }
      ROUTING_ID => {
        if value.is_empty() || value.len() > 255 {
          return Err(ZmqError::InvalidOptionValue(option));
        }
        self.routing_id = Some(Blob::from(value.to_vec()));
      }
      TCP_KEEPALIVE => {
        let mode = parse_i32_option(value)?;
        if !(-1..=1).contains(&mode) {
          return Err(ZmqError::InvalidOptionValue(option));
        }
        self.tcp_keepalive_enabled = mode;
      }
      TCP_KEEPALIVE_IDLE => {
        self.tcp_keepalive_idle = parse_duration_secs_option(value, option)?;
      }
      TCP_KEEPALIVE_INTVL => {
        self.tcp_keepalive_interval = parse_duration_secs_option(value, option)?;
      }
      _ => return Err(ZmqError::InvalidOption(option)),
    }
    Ok(())
  }
}

// --- Helper functions for parsing option values ---

/// Parses a byte slice representing an integer option (native endianness,
/// matching the C API convention).
pub(crate) fn parse_i32_option(value: &[u8]) -> Result<i32, ZmqError> {
  let arr: [u8; 4] = value
    .try_into()
    .map_err(|_| ZmqError::InvalidOptionValue(0))?;
  Ok(i32::from_ne_bytes(arr))
}

pub(crate) fn parse_i64_option(value: &[u8]) -> Result<i64, ZmqError> {
  if let Ok(arr) = <[u8; 8]>::try_from(value) {
    return Ok(i64::from_ne_bytes(arr));
  }
  parse_i32_option(value).map(i64::from)
}

/// Parses a millisecond timeout: -1 for none, 0 and up for a bound.
pub(crate) fn parse_duration_ms_option(
  value: &[u8],
  option: i32,
) -> Result<Option<Duration>, ZmqError> {
  let val = parse_i32_option(value)?;
  match val {
    -1 => Ok(None),
    0.. => Ok(Some(Duration::from_millis(val as u64))),
    _ => Err(ZmqError::InvalidOptionValue(option)),
  }
}

fn parse_duration_secs_option(value: &[u8], option: i32) -> Result<Option<Duration>, ZmqError> {
  let val = parse_i32_option(value)?;
  match val {
    -1 => Ok(None),
    0.. => Ok(Some(Duration::from_secs(val as u64))),
    _ => Err(ZmqError::InvalidOptionValue(option)),
  }
}

/// Convenience for passing integer options to `set_option`.
pub fn option_value(value: i32) -> [u8; 4] {
  value.to_ne_bytes()
}
