//! Match State
//!
//! Board, turn and phase for a single Nim match. Pure state machine with no
//! I/O: the network layer feeds it moves and reports what it decides.

use std::fmt;
use thiserror::Error;

/// Number of piles on the board.
pub const PILE_COUNT: usize = 5;

/// Opening position.
pub const INITIAL_PILES: [u32; PILE_COUNT] = [1, 3, 5, 7, 9];

// =============================================================================
// SLOT
// =============================================================================

/// Seat of a player within a match. Slot one moves first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Slot {
    /// First player to register; moves first.
    One = 1,
    /// Second player.
    Two = 2,
}

impl Slot {
    /// Both seats, in turn order.
    pub const BOTH: [Slot; 2] = [Slot::One, Slot::Two];

    /// The opposing seat.
    #[inline]
    pub fn other(self) -> Self {
        match self {
            Slot::One => Slot::Two,
            Slot::Two => Slot::One,
        }
    }

    /// Wire number (1 or 2).
    #[inline]
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Array index (0 or 1).
    #[inline]
    pub fn index(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// Five Nim piles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Board([u32; PILE_COUNT]);

impl Board {
    /// Board with the given pile counts.
    pub const fn new(piles: [u32; PILE_COUNT]) -> Self {
        Self(piles)
    }

    /// Pile counts, pile 1 first.
    pub fn piles(&self) -> &[u32; PILE_COUNT] {
        &self.0
    }

    /// Count in a 1-based pile, if the index is valid.
    pub fn pile(&self, pile: usize) -> Option<u32> {
        pile.checked_sub(1).and_then(|i| self.0.get(i).copied())
    }

    /// True once every pile is empty.
    pub fn is_cleared(&self) -> bool {
        self.0.iter().all(|&count| count == 0)
    }

    /// Stones left on the board.
    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self(INITIAL_PILES)
    }
}

/// Space-separated counts, as carried by PLAY and OVER.
impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, count) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", count)?;
        }
        Ok(())
    }
}

// =============================================================================
// MOVES
// =============================================================================

/// A requested move after numeric parsing.
///
/// Fields that did not parse as decimal integers are `None` and fail the
/// same range checks as out-of-range values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveRequest {
    /// 1-based pile index.
    pub pile: Option<usize>,
    /// Stones to remove.
    pub quantity: Option<u32>,
}

impl MoveRequest {
    /// A request with known numeric values.
    pub const fn new(pile: usize, quantity: u32) -> Self {
        Self {
            pile: Some(pile),
            quantity: Some(quantity),
        }
    }

    /// Parse the two MOVE fields.
    pub fn parse(pile: &str, quantity: &str) -> Self {
        Self {
            pile: pile.parse().ok(),
            quantity: quantity.parse().ok(),
        }
    }
}

/// Result of an accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Board still has stones; `turn` moves next.
    Continue {
        /// Seat to move next.
        turn: Slot,
    },
    /// The mover took the last stone.
    Won {
        /// The mover.
        winner: Slot,
    },
}

/// Why a move was rejected. A rejected move leaves the game untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MoveError {
    /// Match has not started or is already over.
    #[error("match not in progress")]
    NotInProgress,

    /// Mover does not hold the turn.
    #[error("not this player's turn")]
    Impatient,

    /// Pile index outside 1..=5 or not a number.
    #[error("pile index out of range")]
    PileIndex,

    /// Quantity outside 1..=pile or not a number.
    #[error("quantity out of range")]
    Quantity,
}

// =============================================================================
// MATCH
// =============================================================================

/// Lifecycle of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPhase {
    /// Created; names not yet announced.
    AwaitingNames,
    /// Moves are being accepted.
    InProgress,
    /// A player took the last stone.
    Won {
        /// Winning seat.
        winner: Slot,
    },
    /// A player's connection went away.
    Forfeited {
        /// Remaining seat.
        winner: Slot,
    },
    /// Neither player is left to win.
    Aborted,
}

impl MatchPhase {
    /// True for Won, Forfeited and Aborted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatchPhase::Won { .. } | MatchPhase::Forfeited { .. } | MatchPhase::Aborted
        )
    }

    /// Winning seat, if the match produced one.
    pub fn winner(self) -> Option<Slot> {
        match self {
            MatchPhase::Won { winner } | MatchPhase::Forfeited { winner } => Some(winner),
            _ => None,
        }
    }
}

/// State of one Nim match.
#[derive(Clone, Debug)]
pub struct Game {
    board: Board,
    turn: Slot,
    phase: MatchPhase,
    moves: u32,
}

impl Game {
    /// New match on the opening board, slot one to move.
    pub fn new() -> Self {
        Self::with_board(Board::default())
    }

    /// New match on an arbitrary board.
    pub fn with_board(board: Board) -> Self {
        Self {
            board,
            turn: Slot::One,
            phase: MatchPhase::AwaitingNames,
            moves: 0,
        }
    }

    /// Current board.
    pub fn board(&self) -> Board {
        self.board
    }

    /// Seat holding the turn.
    pub fn turn(&self) -> Slot {
        self.turn
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Accepted moves so far.
    pub fn moves(&self) -> u32 {
        self.moves
    }

    /// Both players named; begin accepting moves.
    pub fn start(&mut self) {
        if self.phase == MatchPhase::AwaitingNames {
            self.phase = MatchPhase::InProgress;
        }
    }

    /// Validate and apply a move by `actor`.
    ///
    /// Checks run in order: phase, turn, pile index, quantity.
    pub fn apply_move(&mut self, actor: Slot, request: MoveRequest) -> Result<MoveOutcome, MoveError> {
        if self.phase != MatchPhase::InProgress {
            return Err(MoveError::NotInProgress);
        }

        if actor != self.turn {
            return Err(MoveError::Impatient);
        }

        let pile = request
            .pile
            .filter(|p| (1..=PILE_COUNT).contains(p))
            .ok_or(MoveError::PileIndex)?;

        let available = self.board.0[pile - 1];
        let quantity = request
            .quantity
            .filter(|q| (1..=available).contains(q))
            .ok_or(MoveError::Quantity)?;

        self.board.0[pile - 1] -= quantity;
        self.moves += 1;

        if self.board.is_cleared() {
            self.phase = MatchPhase::Won { winner: actor };
            Ok(MoveOutcome::Won { winner: actor })
        } else {
            self.turn = actor.other();
            Ok(MoveOutcome::Continue { turn: self.turn })
        }
    }

    /// `departed` left; the other seat wins. Returns the winner, or `None` if
    /// the match was already over.
    pub fn forfeit(&mut self, departed: Slot) -> Option<Slot> {
        if self.phase.is_terminal() {
            return None;
        }

        let winner = departed.other();
        self.phase = MatchPhase::Forfeited { winner };
        Some(winner)
    }

    /// End without a winner.
    pub fn abort(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = MatchPhase::Aborted;
        }
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn started() -> Game {
        let mut game = Game::new();
        game.start();
        game
    }

    #[test]
    fn test_initial_state() {
        let game = Game::new();
        assert_eq!(game.board().piles(), &INITIAL_PILES);
        assert_eq!(game.turn(), Slot::One);
        assert_eq!(game.phase(), MatchPhase::AwaitingNames);
        assert_eq!(game.board().to_string(), "1 3 5 7 9");
    }

    #[test]
    fn test_moves_rejected_before_start() {
        let mut game = Game::new();
        assert_eq!(
            game.apply_move(Slot::One, MoveRequest::new(5, 1)),
            Err(MoveError::NotInProgress)
        );
    }

    #[test]
    fn test_valid_move_flips_turn() {
        let mut game = started();
        let outcome = game.apply_move(Slot::One, MoveRequest::new(5, 4)).unwrap();

        assert_eq!(outcome, MoveOutcome::Continue { turn: Slot::Two });
        assert_eq!(game.board().piles(), &[1, 3, 5, 7, 5]);
        assert_eq!(game.turn(), Slot::Two);
        assert_eq!(game.moves(), 1);
    }

    #[test]
    fn test_out_of_turn_rejected() {
        let mut game = started();
        assert_eq!(
            game.apply_move(Slot::Two, MoveRequest::new(1, 1)),
            Err(MoveError::Impatient)
        );
    }

    #[test]
    fn test_turn_checked_before_pile() {
        let mut game = started();
        assert_eq!(
            game.apply_move(Slot::Two, MoveRequest::new(10, 1)),
            Err(MoveError::Impatient)
        );
    }

    #[test]
    fn test_bad_pile_and_quantity() {
        let mut game = started();
        assert_eq!(game.apply_move(Slot::One, MoveRequest::new(0, 1)), Err(MoveError::PileIndex));
        assert_eq!(game.apply_move(Slot::One, MoveRequest::new(6, 1)), Err(MoveError::PileIndex));
        assert_eq!(game.apply_move(Slot::One, MoveRequest::new(1, 0)), Err(MoveError::Quantity));
        assert_eq!(game.apply_move(Slot::One, MoveRequest::new(1, 2)), Err(MoveError::Quantity));
    }

    #[test]
    fn test_non_numeric_fields_rejected() {
        let mut game = started();
        assert_eq!(
            game.apply_move(Slot::One, MoveRequest::parse("x", "1")),
            Err(MoveError::PileIndex)
        );
        assert_eq!(
            game.apply_move(Slot::One, MoveRequest::parse("3", "lots")),
            Err(MoveError::Quantity)
        );
        assert_eq!(
            game.apply_move(Slot::One, MoveRequest::parse("-1", "1")),
            Err(MoveError::PileIndex)
        );
    }

    #[test]
    fn test_full_game_last_mover_wins() {
        let mut game = started();
        let script = [(5, 9), (4, 7), (3, 5), (2, 3), (1, 1)];
        let mut actor = Slot::One;

        for (i, (pile, quantity)) in script.iter().enumerate() {
            let outcome = game.apply_move(actor, MoveRequest::new(*pile, *quantity)).unwrap();
            if i + 1 < script.len() {
                assert_eq!(outcome, MoveOutcome::Continue { turn: actor.other() });
            } else {
                assert_eq!(outcome, MoveOutcome::Won { winner: Slot::One });
            }
            actor = actor.other();
        }

        assert!(game.board().is_cleared());
        assert_eq!(game.phase(), MatchPhase::Won { winner: Slot::One });
        assert_eq!(game.board().to_string(), "0 0 0 0 0");
        assert_eq!(
            game.apply_move(Slot::Two, MoveRequest::new(1, 1)),
            Err(MoveError::NotInProgress)
        );
    }

    #[test]
    fn test_forfeit_awards_other_slot() {
        let mut game = started();
        assert_eq!(game.forfeit(Slot::One), Some(Slot::Two));
        assert_eq!(game.phase(), MatchPhase::Forfeited { winner: Slot::Two });
        assert_eq!(game.forfeit(Slot::Two), None);
    }

    #[test]
    fn test_abort_keeps_terminal_phase() {
        let mut game = started();
        game.forfeit(Slot::Two);
        game.abort();
        assert_eq!(game.phase().winner(), Some(Slot::One));

        let mut game = started();
        game.abort();
        assert_eq!(game.phase(), MatchPhase::Aborted);
        assert!(game.phase().is_terminal());
    }

    #[test]
    fn test_slot_helpers() {
        assert_eq!(Slot::One.other(), Slot::Two);
        assert_eq!(Slot::Two.number(), 2);
        assert_eq!(Slot::Two.index(), 1);
        assert_eq!(Slot::One.to_string(), "1");
    }

    proptest! {
        #[test]
        fn prop_move_legality(
            piles in prop::array::uniform5(0u32..10),
            pile in 0usize..8,
            quantity in 0u32..12,
        ) {
            let board = Board::new(piles);
            prop_assume!(!board.is_cleared());

            let mut game = Game::with_board(board);
            game.start();

            let legal = (1..=PILE_COUNT).contains(&pile) && quantity >= 1 && quantity <= piles[pile - 1];
            let result = game.apply_move(Slot::One, MoveRequest::new(pile, quantity));

            if legal {
                prop_assert!(result.is_ok());
                prop_assert_eq!(game.board().piles()[pile - 1], piles[pile - 1] - quantity);
                prop_assert_eq!(game.board().total(), board.total() - quantity);
                if game.board().is_cleared() {
                    prop_assert_eq!(game.turn(), Slot::One);
                    prop_assert_eq!(result, Ok(MoveOutcome::Won { winner: Slot::One }));
                } else {
                    prop_assert_eq!(game.turn(), Slot::Two);
                }
            } else {
                prop_assert!(result.is_err());
                prop_assert_eq!(game.board(), board);
                prop_assert_eq!(game.turn(), Slot::One);
            }
        }

        #[test]
        fn prop_invalid_moves_are_idempotent(
            attempts in prop::collection::vec((0usize..8, 0u32..12, any::<bool>()), 1..20),
        ) {
            let mut game = Game::new();
            game.start();
            game.apply_move(Slot::One, MoveRequest::new(5, 3)).unwrap();
            let board = game.board();

            for (pile, quantity, out_of_turn) in attempts {
                let actor = if out_of_turn { Slot::One } else { Slot::Two };
                let legal = !out_of_turn
                    && (1..=PILE_COUNT).contains(&pile)
                    && quantity >= 1
                    && quantity <= board.piles()[pile - 1];
                if legal {
                    continue;
                }

                prop_assert!(game.apply_move(actor, MoveRequest::new(pile, quantity)).is_err());
                prop_assert_eq!(game.board(), board);
                prop_assert_eq!(game.turn(), Slot::Two);
            }
        }
    }
}
