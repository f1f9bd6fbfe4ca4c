// src/transport/endpoint.rs

use crate::error::ZmqError;
use std::net::SocketAddr;

/// Represents a parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
  /// Store the original string alongside for maps and logging.
  Tcp(SocketAddr, String),
  Inproc(String),
}

/// Parses an endpoint string into a structured Endpoint enum.
pub(crate) fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, ZmqError> {
  let invalid_endpoint_err = || ZmqError::InvalidEndpoint(endpoint_str.to_string());

  let Some(separator_pos) = endpoint_str.find("://") else {
    return Err(invalid_endpoint_err());
  };
  let scheme = &endpoint_str[..separator_pos];
  let address_part = &endpoint_str[separator_pos + 3..];

  match scheme {
    "tcp" => address_part
      .parse::<SocketAddr>()
      .map(|addr| Endpoint::Tcp(addr, endpoint_str.to_string()))
      .map_err(|_| {
        tracing::debug!("failed to parse TCP address: {}", address_part);
        invalid_endpoint_err()
      }),

    "inproc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid_endpoint_err())
      } else {
        Ok(Endpoint::Inproc(address_part.to_string()))
      }
    }

    _ => Err(ZmqError::UnsupportedTransport(endpoint_str.to_string())),
  }
}
