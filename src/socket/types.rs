// src/socket/types.rs

//! Socket type identifiers and their pairing rules.

/// The messaging pattern of a socket. Discriminants are the wire values
/// carried in the connection greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketType {
  Pair = 0,
  Pub = 1,
  Sub = 2,
  Req = 3,
  Rep = 4,
  Dealer = 5,
  Router = 6,
  Pull = 7,
  Push = 8,
}

impl SocketType {
  pub(crate) fn from_wire(value: u8) -> Option<Self> {
    match value {
      0 => Some(SocketType::Pair),
      1 => Some(SocketType::Pub),
      2 => Some(SocketType::Sub),
      3 => Some(SocketType::Req),
      4 => Some(SocketType::Rep),
      5 => Some(SocketType::Dealer),
      6 => Some(SocketType::Router),
      7 => Some(SocketType::Pull),
      8 => Some(SocketType::Push),
      _ => None,
    }
  }

  /// Whether a connection between these two socket types is legal. A peer
  /// announcing an incompatible type fails the greeting exchange.
  pub(crate) fn compatible_with(self, peer: SocketType) -> bool {
    use SocketType::*;
    match self {
      Pair => peer == Pair,
      Pub => peer == Sub,
      Sub => peer == Pub,
      Req => matches!(peer, Rep | Router),
      Rep => matches!(peer, Req | Dealer),
      Dealer => matches!(peer, Rep | Dealer | Router),
      Router => matches!(peer, Req | Dealer | Router),
      Pull => peer == Push,
      Push => peer == Pull,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      SocketType::Pair => "PAIR",
      SocketType::Pub => "PUB",
      SocketType::Sub => "SUB",
      SocketType::Req => "REQ",
      SocketType::Rep => "REP",
      SocketType::Dealer => "DEALER",
      SocketType::Router => "ROUTER",
      SocketType::Pull => "PULL",
      SocketType::Push => "PUSH",
    }
  }
}

impl std::fmt::Display for SocketType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wire_values_round_trip() {
    for value in 0u8..=8 {
      let socket_type = SocketType::from_wire(value).unwrap();
      assert_eq!(socket_type as u8, value);
    }
    assert!(SocketType::from_wire(9).is_none());
  }

  #[test]
  fn pairing_rules() {
    assert!(SocketType::Push.compatible_with(SocketType::Pull));
    assert!(!SocketType::Push.compatible_with(SocketType::Push));
    assert!(SocketType::Req.compatible_with(SocketType::Router));
    assert!(!SocketType::Pub.compatible_with(SocketType::Pub));
    assert!(SocketType::Dealer.compatible_with(SocketType::Router));
  }
}
