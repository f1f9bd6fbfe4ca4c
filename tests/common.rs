// tests/common.rs
#![allow(dead_code)] // Not every suite uses every helper.

use pzmq::{Context, Msg, Socket, ZmqError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INPROC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

// Use std::sync::Once for one-time initialization.
static TRACING_INIT: Once = Once::new();

// Setup function to initialize tracing.
fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Default level filter; can be overridden by RUST_LOG.
    let default_filter = "pzmq=debug,warn";
    let env_filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber)
      .expect("Failed to set global tracing subscriber");
  });
}

// Helper to create a context.
pub fn test_context() -> Context {
  setup_tracing();
  Context::new().expect("Failed to create test context")
}

// Helper to generate unique inproc endpoints for parallel tests.
pub fn unique_inproc_endpoint() -> String {
  let pid = std::process::id();
  let count = INPROC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://pzmq_test_{}_{}", pid, count)
}

// Grabs a free localhost port from the kernel and releases it again. The
// tiny reuse race is acceptable for tests that must know the endpoint
// before anything is bound there.
pub fn free_tcp_endpoint() -> String {
  let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("ephemeral bind failed");
  let addr = listener.local_addr().expect("no local addr");
  drop(listener);
  format!("tcp://{}", addr)
}

// Helper for recv with a per-call timeout.
pub fn recv_timeout(socket: &mut Socket, duration: Duration) -> Result<Msg, ZmqError> {
  socket.set_option_int(pzmq::RCVTIMEO, duration.as_millis() as i32)?;
  let result = socket.recv();
  socket.set_option_int(pzmq::RCVTIMEO, -1)?;
  result
}

// Helper for send with a per-call timeout.
pub fn send_timeout(socket: &mut Socket, msg: Msg, duration: Duration) -> Result<(), ZmqError> {
  socket.set_option_int(pzmq::SNDTIMEO, duration.as_millis() as i32)?;
  let result = socket.send(msg);
  socket.set_option_int(pzmq::SNDTIMEO, -1)?;
  result
}
