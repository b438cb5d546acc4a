//! Matchmaker
//!
//! Holds at most one waiting player and pairs it with the next validated
//! arrival. Registration order decides seats: whoever waited is slot one and
//! moves first.

use futures_util::FutureExt;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::game::state::Slot;
use crate::network::player::Player;

/// Non-blocking check for a peer that has gone away.
pub trait PeerProbe {
    /// True if the peer has closed its end. Must not block or consume data.
    fn peer_closed(&self) -> bool;
}

impl PeerProbe for TcpStream {
    fn peer_closed(&self) -> bool {
        // Read-closed readiness (RDHUP) is reported even with unread bytes
        // buffered, which a one-byte peek cannot see past.
        match self.ready(Interest::READABLE).now_or_never() {
            Some(Ok(ready)) if ready.is_read_closed() => return true,
            Some(Err(_)) => return true,
            _ => {}
        }

        let mut buf = [0u8; 1];
        match self.peek(&mut buf).now_or_never() {
            Some(Ok(0)) | Some(Err(_)) => true,
            Some(Ok(_)) | None => false,
        }
    }
}

impl<S: PeerProbe> PeerProbe for Player<S> {
    fn peer_closed(&self) -> bool {
        self.stream().peer_closed()
    }
}

/// Result of handing a player to the matchmaker.
#[derive(Debug)]
pub enum Pairing<S = TcpStream> {
    /// Player is now queued.
    Waiting,
    /// A match is ready: (slot one, slot two).
    Paired(Player<S>, Player<S>),
}

/// Single-slot waiting queue.
#[derive(Debug)]
pub struct Matchmaker<S = TcpStream> {
    queued: Option<Player<S>>,
}

impl<S: PeerProbe> Matchmaker<S> {
    /// Empty queue.
    pub fn new() -> Self {
        Self { queued: None }
    }

    /// Queue `player`, or pair it with the one already waiting.
    ///
    /// A waiting player whose connection has closed is evicted first, so a
    /// live client is never paired with a dead one.
    pub fn enqueue_or_pair(&mut self, mut player: Player<S>) -> Pairing<S> {
        self.evict_if_closed();

        match self.queued.take() {
            None => {
                debug!("Player {:?} queued", player.name());
                self.queued = Some(player);
                Pairing::Waiting
            }
            Some(mut first) => {
                first.assign_slot(Slot::One);
                player.assign_slot(Slot::Two);
                info!("Paired {:?} with {:?}", first.name(), player.name());
                Pairing::Paired(first, player)
            }
        }
    }

    /// Drop the waiting player if its peer closed. Dropping releases its
    /// name. Returns true if a player was evicted.
    pub fn evict_if_closed(&mut self) -> bool {
        let closed = self.queued.as_ref().is_some_and(PeerProbe::peer_closed);
        if closed {
            if let Some(player) = self.queued.take() {
                info!("Waiting player {:?} disconnected", player.name());
            }
        }
        closed
    }

    /// Name of the waiting player.
    pub fn queued_name(&self) -> Option<&str> {
        self.queued.as_ref().and_then(Player::name)
    }

    /// True when nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.queued.is_none()
    }
}

impl<S: PeerProbe> Default for Matchmaker<S> {
    fn default() -> Self {
        Self::new()
    }
}
