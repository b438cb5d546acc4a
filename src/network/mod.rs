//! Network Layer
//!
//! TCP server for the Nim protocol. All game rules live in `game/`; this layer
//! frames bytes, tracks names and owns connections.
//!
//! ## Module Structure
//!
//! - `codec`: frame reader/writer and tokenizer
//! - `protocol`: typed client and server messages, FAIL codes
//! - `registry`: process-wide display names
//! - `player`: one connection plus its name lease
//! - `matchmaker`: the single waiting slot
//! - `session`: the per-match turn loop
//! - `server`: accept loop, handshakes and task layout

pub mod codec;
pub mod matchmaker;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use codec::{DecodeError, EncodeError, Frame, Message, SendError};
pub use matchmaker::{Matchmaker, Pairing, PeerProbe};
pub use player::Player;
pub use protocol::{ClientMessage, FailCode, MessageType, ServerMessage};
pub use registry::{NameLease, NameRegistry, RegistrationError};
pub use server::{GameServer, GameServerError, HandshakeError, ServerConfig};
pub use session::{MatchId, MatchReport, MatchSession};
