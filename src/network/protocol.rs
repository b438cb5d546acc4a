//! Protocol Messages
//!
//! Typed view over codec messages. Seven message types, two from clients
//! (OPEN, MOVE) and five from the server (WAIT, NAME, PLAY, OVER, FAIL).
//!
//! ## FAIL policy
//!
//! Whether a FAIL ends the conversation depends only on when it is sent:
//!
//! - before a match starts (framing faults, wrong opening message, bad or
//!   duplicate name) the connection is closed right after the FAIL;
//! - during a match (bad move, out-of-turn or wrong message type) the
//!   connection stays open and the player is re-prompted with the board.
//!
//! The handshake in `server` and the turn loop in `session` each apply their
//! half. A malformed frame mid-match is the exception: the stream position is
//! lost, so the sender is dropped and forfeits.
//!
//! FAIL 50 replaces any server message that cannot be encoded; see
//! [`ServerMessage::to_wire_message`].

use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::game::state::{Board, MoveError, MoveRequest, Slot};
use crate::network::codec::Message;
use crate::network::registry::RegistrationError;

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// The seven message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Client opens a session with a display name.
    Open,
    /// Server acknowledges OPEN; waiting for an opponent.
    Wait,
    /// Server announces the opponent.
    Name,
    /// Server broadcasts board and turn.
    Play,
    /// Client moves.
    Move,
    /// Server ends the match.
    Over,
    /// Server rejects a message.
    Fail,
}

impl MessageType {
    /// Wire code.
    pub const fn code(self) -> &'static str {
        match self {
            MessageType::Open => "OPEN",
            MessageType::Wait => "WAIT",
            MessageType::Name => "NAME",
            MessageType::Play => "PLAY",
            MessageType::Move => "MOVE",
            MessageType::Over => "OVER",
            MessageType::Fail => "FAIL",
        }
    }

    /// Look up a wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "OPEN" => MessageType::Open,
            "WAIT" => MessageType::Wait,
            "NAME" => MessageType::Name,
            "PLAY" => MessageType::Play,
            "MOVE" => MessageType::Move,
            "OVER" => MessageType::Over,
            "FAIL" => MessageType::Fail,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// FAIL CODES
// =============================================================================

/// FAIL reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FailCode {
    /// Malformed frame or unusable message.
    Invalid = 10,
    /// Name too long, empty, or with forbidden bytes.
    InvalidName = 21,
    /// Name already held by a queued or playing client.
    AlreadyPlaying = 22,
    /// Second OPEN on one connection.
    AlreadyOpen = 23,
    /// MOVE before OPEN.
    NotPlaying = 24,
    /// Out-of-turn message, or non-MOVE from the turn holder.
    Impatient = 31,
    /// Pile index outside 1..=5.
    PileIndex = 32,
    /// Quantity outside 1..=pile.
    Quantity = 33,
    /// Server could not complete the request.
    ServerError = 50,
}

impl FailCode {
    /// Numeric code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Default reason text.
    pub const fn text(self) -> &'static str {
        match self {
            FailCode::Invalid => "Invalid",
            FailCode::InvalidName => "Long Name or Invalid",
            FailCode::AlreadyPlaying => "Already Playing",
            FailCode::AlreadyOpen => "Already Open",
            FailCode::NotPlaying => "Not Playing",
            FailCode::Impatient => "Impatient",
            FailCode::PileIndex => "Pile Index",
            FailCode::Quantity => "Quantity",
            FailCode::ServerError => "Server Error",
        }
    }
}

impl From<RegistrationError> for FailCode {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::InvalidName => FailCode::InvalidName,
            RegistrationError::AlreadyPlaying => FailCode::AlreadyPlaying,
            RegistrationError::AlreadyOpen => FailCode::AlreadyOpen,
        }
    }
}

impl From<MoveError> for FailCode {
    fn from(err: MoveError) -> Self {
        match err {
            MoveError::NotInProgress => FailCode::NotPlaying,
            MoveError::Impatient => FailCode::Impatient,
            MoveError::PileIndex => FailCode::PileIndex,
            MoveError::Quantity => FailCode::Quantity,
        }
    }
}

/// Text sent with FAIL 31 when the turn holder sends something other than MOVE.
pub const EXPECTED_MOVE: &str = "Expected MOVE";

/// OVER reason when the opponent's connection closed.
pub const FORFEIT_REASON: &str = "Forfeit";

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Why a client message could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Type code is none of the seven.
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// Required field absent.
    #[error("{kind} needs {needed} field(s), got {got}")]
    MissingField {
        /// Message type.
        kind: MessageType,
        /// Fields required.
        needed: usize,
        /// Fields present.
        got: usize,
    },
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Open a session under a display name.
    Open {
        /// Requested display name (not yet validated).
        name: String,
    },

    /// Take stones from a pile.
    Move(MoveRequest),

    /// A server-only type sent by a client.
    Unexpected(MessageType),
}

impl ClientMessage {
    /// Interpret a decoded message.
    pub fn parse(message: &Message) -> Result<Self, ProtocolError> {
        let kind = MessageType::from_code(message.kind())
            .ok_or_else(|| ProtocolError::UnknownType(message.kind().to_string()))?;

        let require = |needed: usize| {
            if message.fields().len() < needed {
                Err(ProtocolError::MissingField {
                    kind,
                    needed,
                    got: message.fields().len(),
                })
            } else {
                Ok(())
            }
        };

        match kind {
            MessageType::Open => {
                require(1)?;
                Ok(ClientMessage::Open {
                    name: message.fields()[0].clone(),
                })
            }
            MessageType::Move => {
                require(2)?;
                Ok(ClientMessage::Move(MoveRequest::parse(
                    &message.fields()[0],
                    &message.fields()[1],
                )))
            }
            other => Ok(ClientMessage::Unexpected(other)),
        }
    }

    /// Type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Open { .. } => MessageType::Open,
            ClientMessage::Move(_) => MessageType::Move,
            ClientMessage::Unexpected(kind) => *kind,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// OPEN accepted; waiting for an opponent.
    Wait,

    /// Match found.
    Name {
        /// Recipient's own seat.
        slot: Slot,
        /// Opponent's display name.
        opponent: String,
    },

    /// Board and whose turn it is.
    Play {
        /// Seat to move.
        turn: Slot,
        /// Current board.
        board: Board,
    },

    /// Match ended.
    Over {
        /// Winning seat.
        winner: Slot,
        /// Final board.
        board: Board,
        /// Empty for a normal win, `Forfeit` otherwise.
        reason: String,
    },

    /// Request rejected.
    Fail {
        /// Reason code.
        code: FailCode,
        /// Reason text.
        text: String,
    },
}

impl ServerMessage {
    /// FAIL with the code's default text.
    pub fn fail(code: FailCode) -> Self {
        Self::fail_with(code, code.text())
    }

    /// FAIL with custom text.
    pub fn fail_with(code: FailCode, text: impl Into<String>) -> Self {
        ServerMessage::Fail {
            code,
            text: text.into(),
        }
    }

    /// Type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::Wait => MessageType::Wait,
            ServerMessage::Name { .. } => MessageType::Name,
            ServerMessage::Play { .. } => MessageType::Play,
            ServerMessage::Over { .. } => MessageType::Over,
            ServerMessage::Fail { .. } => MessageType::Fail,
        }
    }

    /// Codec representation.
    pub fn to_message(&self) -> Message {
        let kind = self.message_type().code();
        match self {
            ServerMessage::Wait => Message::new(kind, Vec::<String>::new()),
            ServerMessage::Name { slot, opponent } => {
                Message::new(kind, [slot.to_string(), opponent.clone()])
            }
            ServerMessage::Play { turn, board } => {
                Message::new(kind, [turn.to_string(), board.to_string()])
            }
            ServerMessage::Over { winner, board, reason } => {
                Message::new(kind, [winner.to_string(), board.to_string(), reason.clone()])
            }
            ServerMessage::Fail { code, text } => {
                Message::new(kind, [format!("{:02} {}", code.code(), text)])
            }
        }
    }

    /// Codec representation that is guaranteed to encode.
    ///
    /// A message that would not fit a frame (or carries a `|` in a field) is
    /// swapped for FAIL 50, so the peer still gets a well-formed reply.
    pub fn to_wire_message(&self) -> Message {
        let message = self.to_message();
        match message.to_payload() {
            Ok(_) => message,
            Err(err) => {
                warn!("Cannot encode {}: {}", self.message_type(), err);
                ServerMessage::fail(FailCode::ServerError).to_message()
            }
        }
    }
}
