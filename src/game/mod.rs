//! Game Logic Module
//!
//! Nim rules with no I/O.
//!
//! ## Module Structure
//!
//! - `state`: Board, turn order, move validation, match phase

pub mod state;

// Re-export key types
pub use state::{Board, Game, MatchPhase, MoveError, MoveOutcome, MoveRequest, Slot};
