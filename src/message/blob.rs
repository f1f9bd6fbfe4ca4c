// src/message/blob.rs

use bytes::Bytes;
use std::fmt;

/// An immutable byte string with cheap clones, used for peer identities.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(Bytes);

impl Blob {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_bytes(data: Bytes) -> Self {
    Self(data)
  }

  pub fn from_static(data: &'static [u8]) -> Self {
    Self(Bytes::from_static(data))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl From<Vec<u8>> for Blob {
  fn from(data: Vec<u8>) -> Self {
    Self(Bytes::from(data))
  }
}

impl AsRef<[u8]> for Blob {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl fmt::Debug for Blob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Blob({} bytes)", self.0.len())
  }
}
