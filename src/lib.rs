//! # nimd
//!
//! Two-player Nim over a length-prefixed text protocol on TCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           NIMD                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Game rules (no I/O)                       │
//! │  └── state.rs    - Board, turn order, move validation        │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── codec.rs    - `0|LL|TYPE|f1|...|` frames                │
//! │  ├── protocol.rs - Message types and FAIL codes              │
//! │  ├── registry.rs - Active display names                      │
//! │  ├── player.rs   - Connection plus name lease                │
//! │  ├── matchmaker.rs - Single waiting slot                     │
//! │  ├── session.rs  - Per-match turn loop                       │
//! │  └── server.rs   - Accept loop and handshakes                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Every connection gets a handshake task, every match gets its own task
//! owning both connections, and the only state shared between matches is the
//! [`NameRegistry`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::state::{Board, Game, MatchPhase, Slot};
pub use network::codec::Message;
pub use network::registry::NameRegistry;
pub use network::server::{GameServer, GameServerError, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
