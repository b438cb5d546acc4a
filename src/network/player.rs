//! Connected Player
//!
//! A client connection plus the name it opened under and, once paired, its
//! seat. Owned by exactly one task at a time: the handshake, then the
//! matchmaker, then the match.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;

use crate::game::state::Slot;
use crate::network::codec::{self, SendError};
use crate::network::protocol::ServerMessage;
use crate::network::registry::{NameLease, NameRegistry, RegistrationError};

/// A connected client.
#[derive(Debug)]
pub struct Player<S = TcpStream> {
    stream: S,
    addr: SocketAddr,
    lease: Option<NameLease>,
    slot: Option<Slot>,
}

impl<S> Player<S> {
    /// Wrap a freshly accepted connection.
    pub fn new(stream: S, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            lease: None,
            slot: None,
        }
    }

    /// Claim `name` for this connection.
    ///
    /// Checks, in order: name syntax, whether this connection already
    /// opened, whether another client holds the name. On success the name is
    /// registered before this returns.
    pub fn open(&mut self, registry: &Arc<NameRegistry>, name: &str) -> Result<(), RegistrationError> {
        crate::network::registry::validate_name(name)?;

        if self.lease.is_some() {
            return Err(RegistrationError::AlreadyOpen);
        }

        self.lease = Some(registry.register(name, self.addr)?);
        Ok(())
    }

    /// True once a name has been accepted.
    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }

    /// Display name, once open.
    pub fn name(&self) -> Option<&str> {
        self.lease.as_ref().map(NameLease::name)
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Seat, once paired.
    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    /// Seat this player.
    pub fn assign_slot(&mut self, slot: Slot) {
        self.slot = Some(slot);
    }

    /// Underlying connection.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Underlying connection, mutably.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Give up the connection and the name lease.
    pub fn into_parts(self) -> (S, Option<NameLease>) {
        (self.stream, self.lease)
    }
}

impl<S: AsyncWrite + Unpin> Player<S> {
    /// Send one server message.
    pub async fn send(&mut self, message: &ServerMessage) -> Result<(), SendError> {
        codec::write_message(&mut self.stream, &message.to_wire_message()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::codec::read_message;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_open_registers_name() {
        let registry = NameRegistry::new();
        let mut player = Player::new((), addr());

        assert!(!player.is_open());
        player.open(&registry, "Alice").unwrap();

        assert!(player.is_open());
        assert_eq!(player.name(), Some("Alice"));
        assert!(registry.contains("Alice"));
    }

    #[test]
    fn test_second_open_rejected() {
        let registry = NameRegistry::new();
        let mut player = Player::new((), addr());
        player.open(&registry, "Alice").unwrap();

        assert_eq!(player.open(&registry, "Bob"), Err(RegistrationError::AlreadyOpen));
        assert_eq!(player.open(&registry, "Alice"), Err(RegistrationError::AlreadyOpen));
        assert!(!registry.contains("Bob"));
    }

    #[test]
    fn test_invalid_name_checked_first() {
        let registry = NameRegistry::new();
        let mut player = Player::new((), addr());
        player.open(&registry, "Alice").unwrap();

        assert_eq!(player.open(&registry, ""), Err(RegistrationError::InvalidName));
    }

    #[test]
    fn test_duplicate_across_connections() {
        let registry = NameRegistry::new();
        let mut first = Player::new((), addr());
        let mut second = Player::new((), addr());

        first.open(&registry, "Alice").unwrap();
        assert_eq!(second.open(&registry, "Alice"), Err(RegistrationError::AlreadyPlaying));
        assert!(!second.is_open());
    }

    #[test]
    fn test_drop_releases_name() {
        let registry = NameRegistry::new();
        let mut player = Player::new((), addr());
        player.open(&registry, "Alice").unwrap();

        drop(player);
        assert!(!registry.contains("Alice"));
    }

    #[tokio::test]
    async fn test_send_writes_frame() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut player = Player::new(client, addr());

        player.send(&ServerMessage::Wait).await.unwrap();

        let msg = read_message(&mut server).await.unwrap();
        assert_eq!(msg.kind(), "WAIT");
    }

    #[tokio::test]
    async fn test_unencodable_message_sends_server_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut player = Player::new(client, addr());
        let oversized = ServerMessage::Name { slot: Slot::One, opponent: "x".repeat(120) };

        player.send(&oversized).await.unwrap();

        let msg = read_message(&mut server).await.unwrap();
        assert_eq!(msg.kind(), "FAIL");
        assert_eq!(msg.fields(), ["50 Server Error"]);
    }
}
