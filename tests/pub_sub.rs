// tests/pub_sub.rs

use pzmq::{Msg, MsgFlags, SocketType, ZmqError};
use std::time::Duration;
mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(5);
const SHORT_TIMEOUT: Duration = Duration::from_millis(300);
const SETTLE: Duration = Duration::from_millis(300);

#[test]
fn pub_sub_tcp_topic_filtering() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut publisher = ctx.socket(SocketType::Pub)?;
  let mut subscriber = ctx.socket(SocketType::Sub)?;

  publisher.bind("tcp://127.0.0.1:0")?;
  let endpoint = publisher.last_endpoint().expect("bound endpoint");

  subscriber.set_option(pzmq::SUBSCRIBE, b"topic.a")?;
  subscriber.connect(&endpoint)?;
  // Filtering happens at the subscriber, so only the connection itself
  // needs to settle before publishing.
  std::thread::sleep(SETTLE);

  publisher.send(Msg::from_static(b"topic.b ignored"))?;
  publisher.send(Msg::from_static(b"topic.a hello"))?;
  publisher.send(Msg::from_static(b"other ignored"))?;
  publisher.send(Msg::from_static(b"topic.a world"))?;

  let first = common::recv_timeout(&mut subscriber, LONG_TIMEOUT)?;
  assert_eq!(first.data().unwrap(), b"topic.a hello");
  let second = common::recv_timeout(&mut subscriber, LONG_TIMEOUT)?;
  assert_eq!(second.data().unwrap(), b"topic.a world");

  // Nothing else sneaks through.
  let nothing = common::recv_timeout(&mut subscriber, SHORT_TIMEOUT);
  assert!(matches!(nothing, Err(ZmqError::Timeout)));
  Ok(())
}

#[test]
fn sub_without_subscription_receives_nothing() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut publisher = ctx.socket(SocketType::Pub)?;
  let mut subscriber = ctx.socket(SocketType::Sub)?;

  publisher.bind("tcp://127.0.0.1:0")?;
  let endpoint = publisher.last_endpoint().expect("bound endpoint");
  subscriber.connect(&endpoint)?;
  std::thread::sleep(SETTLE);

  publisher.send(Msg::from_static(b"anything"))?;
  let nothing = common::recv_timeout(&mut subscriber, SHORT_TIMEOUT);
  assert!(matches!(nothing, Err(ZmqError::Timeout)));
  Ok(())
}

#[test]
fn empty_subscription_matches_everything() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut publisher = ctx.socket(SocketType::Pub)?;
  let mut subscriber = ctx.socket(SocketType::Sub)?;

  publisher.bind("tcp://127.0.0.1:0")?;
  let endpoint = publisher.last_endpoint().expect("bound endpoint");
  subscriber.set_option(pzmq::SUBSCRIBE, b"")?;
  subscriber.connect(&endpoint)?;
  std::thread::sleep(SETTLE);

  publisher.send(Msg::from_static(b"first"))?;
  publisher.send(Msg::from_static(b"second"))?;

  assert_eq!(common::recv_timeout(&mut subscriber, LONG_TIMEOUT)?.data().unwrap(), b"first");
  assert_eq!(common::recv_timeout(&mut subscriber, LONG_TIMEOUT)?.data().unwrap(), b"second");
  Ok(())
}

#[test]
fn multipart_filtering_drops_whole_message() -> Result<(), ZmqError> {
  // The first frame is the topic; a rejected message disappears whole,
  // an accepted one arrives whole.
  let ctx = common::test_context();
  let mut publisher = ctx.socket(SocketType::Pub)?;
  let mut subscriber = ctx.socket(SocketType::Sub)?;

  publisher.bind("tcp://127.0.0.1:0")?;
  let endpoint = publisher.last_endpoint().expect("bound endpoint");
  subscriber.set_option(pzmq::SUBSCRIBE, b"keep")?;
  subscriber.connect(&endpoint)?;
  std::thread::sleep(SETTLE);

  let mut topic = Msg::from_static(b"drop");
  topic.set_flags(MsgFlags::MORE);
  publisher.send(topic)?;
  publisher.send(Msg::from_static(b"dropped payload"))?;

  let mut topic = Msg::from_static(b"keep");
  topic.set_flags(MsgFlags::MORE);
  publisher.send(topic)?;
  publisher.send(Msg::from_static(b"kept payload"))?;

  let first = common::recv_timeout(&mut subscriber, LONG_TIMEOUT)?;
  assert_eq!(first.data().unwrap(), b"keep");
  assert!(first.is_more());
  let second = common::recv_timeout(&mut subscriber, LONG_TIMEOUT)?;
  assert_eq!(second.data().unwrap(), b"kept payload");
  assert!(!second.is_more());
  Ok(())
}

#[test]
fn pub_inproc_fan_out() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let mut publisher = ctx.socket(SocketType::Pub)?;
  let endpoint = common::unique_inproc_endpoint();
  publisher.bind(&endpoint)?;

  let mut sub_a = ctx.socket(SocketType::Sub)?;
  sub_a.set_option(pzmq::SUBSCRIBE, b"")?;
  sub_a.connect(&endpoint)?;
  let mut sub_b = ctx.socket(SocketType::Sub)?;
  sub_b.set_option(pzmq::SUBSCRIBE, b"")?;
  sub_b.connect(&endpoint)?;

  // The binder attaches connector pipes when it next processes commands,
  // which the send below does first.
  publisher.send(Msg::from_static(b"fan-out"))?;

  assert_eq!(common::recv_timeout(&mut sub_a, LONG_TIMEOUT)?.data().unwrap(), b"fan-out");
  assert_eq!(common::recv_timeout(&mut sub_b, LONG_TIMEOUT)?.data().unwrap(), b"fan-out");
  Ok(())
}
