// tests/push_pull.rs

use pzmq::{Msg, MsgFlags, SocketType, ZmqError};
use std::time::Duration;
mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(5);
const SHORT_TIMEOUT: Duration = Duration::from_millis(200);

#[test]
fn push_pull_tcp_basic_messaging() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  let mut push = ctx.socket(SocketType::Push)?;

  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");
  push.connect(&endpoint)?;

  let msg_data = b"Hello PULL from PUSH";
  push.send(Msg::from_static(msg_data))?;

  let received = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
  assert_eq!(received.data().unwrap(), msg_data);

  push.close()?;
  pull.close()?;
  drop(push);
  drop(pull);
  ctx.term()?;
  Ok(())
}

#[test]
fn push_pull_tcp_ordered_delivery() -> Result<(), ZmqError> {
  // Ten thousand messages, each an index as big-endian u64, arrive in
  // exactly the order they were sent.
  const COUNT: u64 = 10_000;

  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");

  let sender_ctx = ctx.clone();
  let sender = std::thread::spawn(move || -> Result<(), ZmqError> {
    let mut push = sender_ctx.socket(SocketType::Push)?;
    push.connect(&endpoint)?;
    for i in 0..COUNT {
      push.send(Msg::from_vec(i.to_be_bytes().to_vec()))?;
    }
    // Close drains whatever is still queued before returning.
    push.close()?;
    Ok(())
  });

  for i in 0..COUNT {
    let msg = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
    let raw: [u8; 8] = msg.data().unwrap().try_into().expect("8-byte payload");
    assert_eq!(u64::from_be_bytes(raw), i, "message out of order");
  }

  sender.join().expect("sender thread panicked")?;
  pull.close()?;
  drop(pull);
  ctx.term()?;
  Ok(())
}

#[test]
fn push_pull_tcp_large_frame() -> Result<(), ZmqError> {
  // A two-mebibyte frame exercises the zero-copy path on both sides.
  const SIZE: usize = 2 * 1024 * 1024;

  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");

  let sender_ctx = ctx.clone();
  let sender = std::thread::spawn(move || -> Result<(), ZmqError> {
    let mut push = sender_ctx.socket(SocketType::Push)?;
    push.connect(&endpoint)?;
    push.send(Msg::from_vec(vec![0xAB; SIZE]))?;
    push.close()?;
    Ok(())
  });

  let msg = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
  assert_eq!(msg.size(), SIZE);
  assert!(msg.data().unwrap().iter().all(|&b| b == 0xAB));

  sender.join().expect("sender thread panicked")?;
  Ok(())
}

#[test]
fn push_pull_tcp_multipart() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  let mut push = ctx.socket(SocketType::Push)?;

  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");
  push.connect(&endpoint)?;

  let mut part1 = Msg::from_static(b"a");
  part1.set_flags(MsgFlags::MORE);
  let mut part2 = Msg::from_static(b"bb");
  part2.set_flags(MsgFlags::MORE);
  let part3 = Msg::from_static(b"ccc");

  push.send(part1)?;
  push.send(part2)?;
  push.send(part3)?;

  let first = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
  assert_eq!(first.data().unwrap(), b"a");
  assert!(first.is_more());
  let second = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
  assert_eq!(second.data().unwrap(), b"bb");
  assert!(second.is_more());
  let third = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
  assert_eq!(third.data().unwrap(), b"ccc");
  assert!(!third.is_more());
  Ok(())
}

#[test]
fn push_without_peers_reports_eagain() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut push = ctx.socket(SocketType::Push)?;
  // No connect at all: an immediate send has nowhere to go.
  let result = common::send_timeout(&mut push, Msg::from_static(b"nope"), Duration::ZERO);
  assert!(matches!(result, Err(ZmqError::ResourceLimitReached)));
  Ok(())
}

#[test]
fn push_pull_inproc_basic_messaging() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  let mut push = ctx.socket(SocketType::Push)?;

  let endpoint = common::unique_inproc_endpoint();
  pull.bind(&endpoint)?;
  push.connect(&endpoint)?;

  push.send(Msg::from_static(b"Hello inproc"))?;
  let received = common::recv_timeout(&mut pull, SHORT_TIMEOUT)?;
  assert_eq!(received.data().unwrap(), b"Hello inproc");
  Ok(())
}

#[test]
fn push_pull_inproc_multiple_clients() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  let endpoint = common::unique_inproc_endpoint();
  pull.bind(&endpoint)?;

  let mut push1 = ctx.socket(SocketType::Push)?;
  let mut push2 = ctx.socket(SocketType::Push)?;
  push1.connect(&endpoint)?;
  push2.connect(&endpoint)?;

  push1.send(Msg::from_static(b"From Push 1"))?;
  push2.send(Msg::from_static(b"From Push 2"))?;

  let mut received = std::collections::HashSet::new();
  received.insert(common::recv_timeout(&mut pull, LONG_TIMEOUT)?.data().unwrap().to_vec());
  received.insert(common::recv_timeout(&mut pull, LONG_TIMEOUT)?.data().unwrap().to_vec());

  assert!(received.contains("From Push 1".as_bytes()));
  assert!(received.contains("From Push 2".as_bytes()));
  assert_eq!(received.len(), 2);
  Ok(())
}

#[test]
fn inproc_back_pressure_refuses_then_recovers() -> Result<(), ZmqError> {
  // Above the high-water-mark the producer is refused, never lossy; the
  // consumer advancing makes it writable again.
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  let mut push = ctx.socket(SocketType::Push)?;
  pull.set_option_int(pzmq::RCVHWM, 1)?;
  push.set_option_int(pzmq::SNDHWM, 1)?;

  let endpoint = common::unique_inproc_endpoint();
  pull.bind(&endpoint)?;
  push.connect(&endpoint)?;

  // Pipe capacity is SNDHWM + RCVHWM = 2.
  push.send(Msg::from_static(b"one"))?;
  push.send(Msg::from_static(b"two"))?;
  let refused = common::send_timeout(&mut push, Msg::from_static(b"three"), Duration::ZERO);
  assert!(matches!(refused, Err(ZmqError::ResourceLimitReached)));

  // Draining one message reopens the pipe.
  assert_eq!(common::recv_timeout(&mut pull, SHORT_TIMEOUT)?.data().unwrap(), b"one");
  common::send_timeout(&mut push, Msg::from_static(b"three"), Duration::from_millis(500))?;

  assert_eq!(common::recv_timeout(&mut pull, SHORT_TIMEOUT)?.data().unwrap(), b"two");
  assert_eq!(common::recv_timeout(&mut pull, SHORT_TIMEOUT)?.data().unwrap(), b"three");
  Ok(())
}

#[test]
fn inproc_connect_without_binder_is_refused() {
  let ctx = common::test_context();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  let result = push.connect("inproc://never-bound-here");
  assert!(matches!(result, Err(ZmqError::ConnectionRefused(_))));
}
