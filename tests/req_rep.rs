// tests/req_rep.rs

use pzmq::{Msg, SocketType, ZmqError};
use std::time::Duration;
mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn req_rep_tcp_round_trip() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut rep = ctx.socket(SocketType::Rep)?;
  let mut req = ctx.socket(SocketType::Req)?;

  rep.bind("tcp://127.0.0.1:0")?;
  let endpoint = rep.last_endpoint().expect("bound endpoint");
  req.connect(&endpoint)?;

  req.send(Msg::from_static(b"ping"))?;
  let request = common::recv_timeout(&mut rep, LONG_TIMEOUT)?;
  assert_eq!(request.data().unwrap(), b"ping");
  assert!(!request.is_more());

  rep.send(Msg::from_static(b"pong"))?;
  let reply = common::recv_timeout(&mut req, LONG_TIMEOUT)?;
  assert_eq!(reply.data().unwrap(), b"pong");
  assert!(!reply.is_more());
  Ok(())
}

#[test]
fn req_rep_multiple_exchanges() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut rep = ctx.socket(SocketType::Rep)?;
  let mut req = ctx.socket(SocketType::Req)?;

  rep.bind("tcp://127.0.0.1:0")?;
  let endpoint = rep.last_endpoint().expect("bound endpoint");
  req.connect(&endpoint)?;

  for round in 0..10u8 {
    req.send(Msg::from_vec(vec![round]))?;
    let request = common::recv_timeout(&mut rep, LONG_TIMEOUT)?;
    assert_eq!(request.data().unwrap(), &[round]);
    rep.send(Msg::from_vec(vec![round, round]))?;
    let reply = common::recv_timeout(&mut req, LONG_TIMEOUT)?;
    assert_eq!(reply.data().unwrap(), &[round, round]);
  }
  Ok(())
}

#[test]
fn req_enforces_send_recv_alternation() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut rep = ctx.socket(SocketType::Rep)?;
  let mut req = ctx.socket(SocketType::Req)?;

  rep.bind("tcp://127.0.0.1:0")?;
  let endpoint = rep.last_endpoint().expect("bound endpoint");
  req.connect(&endpoint)?;

  // Receiving before any request is a state machine violation.
  assert!(matches!(req.recv(), Err(ZmqError::InvalidState(_))));

  req.send(Msg::from_static(b"first"))?;
  // A second request before the reply is one too.
  assert!(matches!(
    req.send(Msg::from_static(b"second")),
    Err(ZmqError::InvalidState(_))
  ));

  // The pending exchange still completes.
  let request = common::recv_timeout(&mut rep, LONG_TIMEOUT)?;
  assert_eq!(request.data().unwrap(), b"first");
  rep.send(Msg::from_static(b"reply"))?;
  assert_eq!(common::recv_timeout(&mut req, LONG_TIMEOUT)?.data().unwrap(), b"reply");
  Ok(())
}

#[test]
fn rep_enforces_recv_send_alternation() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut rep = ctx.socket(SocketType::Rep)?;
  rep.bind("tcp://127.0.0.1:0")?;

  // Replying before a request arrived is a state machine violation.
  assert!(matches!(
    rep.send(Msg::from_static(b"unprompted")),
    Err(ZmqError::InvalidState(_))
  ));
  Ok(())
}
