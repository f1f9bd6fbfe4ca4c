// tests/lifecycle.rs

use pzmq::{Msg, SocketType, ZmqError};
use std::io::{Read, Write};
use std::time::Duration;
mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn reconnect_after_late_bind() -> Result<(), ZmqError> {
  // Connecting to an endpoint nobody listens on fails quietly and keeps
  // retrying; once the peer binds within the backoff window the session
  // establishes and delivers.
  let ctx = common::test_context();
  let endpoint = common::free_tcp_endpoint();

  let sender_ctx = ctx.clone();
  let sender_endpoint = endpoint.clone();
  let sender = std::thread::spawn(move || -> Result<(), ZmqError> {
    let mut push = sender_ctx.socket(SocketType::Push)?;
    push.connect(&sender_endpoint)?;
    // Blocks until the late binder appears and the pipe opens.
    push.send(Msg::from_static(b"better late than never"))?;
    push.close()?;
    Ok(())
  });

  std::thread::sleep(Duration::from_millis(400));
  let mut pull = ctx.socket(SocketType::Pull)?;
  pull.bind(&endpoint)?;

  let msg = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
  assert_eq!(msg.data().unwrap(), b"better late than never");
  sender.join().expect("sender thread panicked")?;
  Ok(())
}

#[test]
fn bad_greeting_kills_only_the_offending_connection() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");
  let addr = endpoint.strip_prefix("tcp://").unwrap().to_string();

  // A healthy peer first.
  let mut push = ctx.socket(SocketType::Push)?;
  push.connect(&endpoint)?;
  push.send(Msg::from_static(b"before"))?;
  assert_eq!(common::recv_timeout(&mut pull, LONG_TIMEOUT)?.data().unwrap(), b"before");

  // A raw connection with a corrupted greeting signature.
  let mut raw = std::net::TcpStream::connect(&addr).expect("raw connect failed");
  raw
    .set_read_timeout(Some(Duration::from_secs(3)))
    .expect("set_read_timeout failed");
  raw.write_all(&[0xFE; 12]).expect("raw write failed");

  // The engine drops the connection; the raw peer sees EOF (or a reset).
  let mut sink = [0u8; 64];
  loop {
    match raw.read(&mut sink) {
      Ok(0) => break,
      Ok(_) => continue, // our greeting bytes that were already in flight
      Err(e)
        if e.kind() == std::io::ErrorKind::ConnectionReset
          || e.kind() == std::io::ErrorKind::BrokenPipe =>
      {
        break;
      }
      Err(e) => panic!("expected EOF after bad greeting, got {}", e),
    }
  }

  // The healthy session on the same reactor keeps serving.
  push.send(Msg::from_static(b"after"))?;
  assert_eq!(common::recv_timeout(&mut pull, LONG_TIMEOUT)?.data().unwrap(), b"after");
  Ok(())
}

#[test]
fn close_drains_in_flight_messages() -> Result<(), ZmqError> {
  // A hundred queued messages survive the sender closing: close lingers
  // until the session delivered them all.
  const COUNT: u64 = 100;

  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");

  let mut push = ctx.socket(SocketType::Push)?;
  push.connect(&endpoint)?;
  for i in 0..COUNT {
    push.send(Msg::from_vec(i.to_be_bytes().to_vec()))?;
  }
  push.close()?;
  drop(push);

  for i in 0..COUNT {
    let msg = common::recv_timeout(&mut pull, LONG_TIMEOUT)?;
    let raw: [u8; 8] = msg.data().unwrap().try_into().expect("8-byte payload");
    assert_eq!(u64::from_be_bytes(raw), i);
  }

  pull.close()?;
  drop(pull);
  ctx.term()?;
  Ok(())
}

#[test]
fn linger_zero_discards_undeliverable_messages() -> Result<(), ZmqError> {
  // With no peer and LINGER=0, close returns immediately instead of
  // waiting for a delivery that can never happen.
  let ctx = common::test_context();
  let endpoint = common::free_tcp_endpoint();

  let mut push = ctx.socket(SocketType::Push)?;
  push.set_option_int(pzmq::LINGER, 0)?;
  push.set_option_int(pzmq::SNDTIMEO, 0)?;
  push.connect(&endpoint)?;

  // Nothing is connected, so sends are refused; close regardless.
  let _ = push.send(Msg::from_static(b"doomed"));
  let start = std::time::Instant::now();
  push.close()?;
  assert!(start.elapsed() < Duration::from_secs(1));
  Ok(())
}

#[test]
fn term_completes_after_all_sockets_close() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  let mut push = ctx.socket(SocketType::Push)?;

  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");
  push.connect(&endpoint)?;
  push.send(Msg::from_static(b"payload"))?;
  assert_eq!(common::recv_timeout(&mut pull, LONG_TIMEOUT)?.data().unwrap(), b"payload");

  push.close()?;
  pull.close()?;
  drop(push);
  drop(pull);

  // All sockets are closed, so term returns promptly with every reactor
  // thread joined and every handle released.
  ctx.term()?;
  Ok(())
}

#[test]
fn disconnect_drops_the_connection() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut pull = ctx.socket(SocketType::Pull)?;
  let mut push = ctx.socket(SocketType::Push)?;

  pull.bind("tcp://127.0.0.1:0")?;
  let endpoint = pull.last_endpoint().expect("bound endpoint");
  push.connect(&endpoint)?;
  push.send(Msg::from_static(b"alive"))?;
  assert_eq!(common::recv_timeout(&mut pull, LONG_TIMEOUT)?.data().unwrap(), b"alive");

  push.disconnect(&endpoint)?;
  std::thread::sleep(Duration::from_millis(300));

  // The pipe is gone, so sends have nowhere to go.
  push.set_option_int(pzmq::SNDTIMEO, 300)?;
  let refused = push.send(Msg::from_static(b"into the void"));
  match refused {
    // The detach ack may still have been in the mailbox for the first
    // attempt; the retry must fail.
    Ok(()) => {
      std::thread::sleep(Duration::from_millis(200));
      assert!(matches!(
        push.send(Msg::from_static(b"again")),
        Err(ZmqError::ResourceLimitReached | ZmqError::Timeout)
      ));
    }
    Err(e) => assert!(matches!(e, ZmqError::ResourceLimitReached | ZmqError::Timeout)),
  }
  Ok(())
}

#[test]
fn sockets_are_unusable_after_close() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut push = ctx.socket(SocketType::Push)?;
  push.close()?;
  assert!(matches!(
    push.send(Msg::from_static(b"late")),
    Err(ZmqError::InvalidState(_))
  ));
  assert!(matches!(push.bind("tcp://127.0.0.1:0"), Err(ZmqError::InvalidState(_))));
  Ok(())
}
