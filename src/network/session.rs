//! Match Session
//!
//! Runs one paired match to completion. The session owns both connections:
//! a reader task per connection decodes frames into a shared channel, and the
//! session loop applies them to the [`Game`] in arrival order and writes the
//! replies. Watching both readers at once is what lets a disconnect from the
//! player who is not on turn end the match immediately.

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::game::state::{Board, Game, MatchPhase, MoveOutcome, Slot};
use crate::network::codec::{self, DecodeError, Message, SendError};
use crate::network::player::Player;
use crate::network::protocol::{
    ClientMessage, FailCode, ServerMessage, EXPECTED_MOVE, FORFEIT_REASON,
};
use crate::network::registry::NameLease;

/// Capacity of the channel between the reader tasks and the session loop.
const INBOUND_CAPACITY: usize = 16;

/// Unique match identifier.
pub type MatchId = Uuid;

/// What a reader task saw on its connection.
#[derive(Debug)]
enum Inbound {
    /// A well-formed frame.
    Message(Message),
    /// A frame that failed to decode. The reader stops after this.
    Malformed(DecodeError),
    /// End of stream or read error.
    Closed,
}

/// Summary of a finished match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    /// Match identifier.
    pub id: MatchId,
    /// Terminal phase.
    pub phase: MatchPhase,
    /// Board when the match ended.
    pub board: Board,
    /// Accepted moves.
    pub moves: u32,
}

/// One side of the table.
struct Seat<S> {
    name: String,
    addr: SocketAddr,
    writer: Option<WriteHalf<S>>,
    pending_reader: Option<ReadHalf<S>>,
    reader: Option<JoinHandle<()>>,
    _lease: Option<NameLease>,
}

impl<S> Seat<S> {
    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn close(&mut self) {
        self.writer = None;
        self.pending_reader = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// A single two-player match.
pub struct MatchSession<S = TcpStream> {
    id: MatchId,
    game: Game,
    seats: [Seat<S>; 2],
}

impl<S> MatchSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Seat `first` as slot one and `second` as slot two.
    pub fn new(id: MatchId, first: Player<S>, second: Player<S>) -> Self {
        Self {
            id,
            game: Game::new(),
            seats: [Self::seat(first), Self::seat(second)],
        }
    }

    fn seat(player: Player<S>) -> Seat<S> {
        let name = player.name().unwrap_or_default().to_string();
        let addr = player.addr();
        let (stream, lease) = player.into_parts();
        let (reader, writer) = tokio::io::split(stream);

        Seat {
            name,
            addr,
            writer: Some(writer),
            pending_reader: Some(reader),
            reader: None,
            _lease: lease,
        }
    }

    /// Match identifier.
    pub fn id(&self) -> MatchId {
        self.id
    }

    /// Display name in `slot`.
    pub fn name(&self, slot: Slot) -> &str {
        &self.seats[slot.index()].name
    }

    /// Play the match to a terminal phase.
    ///
    /// Both connections are closed and both names released when this
    /// returns.
    #[instrument(skip(self), fields(match_id = %self.id))]
    pub async fn run(mut self) -> MatchReport {
        info!(
            "Match {} starting: {} ({}) vs {} ({})",
            self.id,
            self.seats[0].name,
            self.seats[0].addr,
            self.seats[1].name,
            self.seats[1].addr,
        );

        let (events_tx, mut events) = mpsc::channel(INBOUND_CAPACITY);
        for slot in Slot::BOTH {
            let seat = &mut self.seats[slot.index()];
            if let Some(reader) = seat.pending_reader.take() {
                seat.reader = Some(tokio::spawn(read_loop(slot, reader, events_tx.clone())));
            }
        }
        drop(events_tx);

        self.open_match().await;

        while !self.game.phase().is_terminal() {
            let (slot, event) = match events.recv().await {
                Some(event) => event,
                None => {
                    self.game.abort();
                    break;
                }
            };

            if !self.seats[slot.index()].is_connected() {
                continue;
            }

            match event {
                Inbound::Message(message) => self.handle_message(slot, message).await,
                Inbound::Malformed(err) => {
                    debug!("Malformed frame from slot {}: {}", slot, err);
                    self.send(slot, &ServerMessage::fail(FailCode::Invalid)).await;
                    self.depart(slot).await;
                }
                Inbound::Closed => {
                    info!("Slot {} ({}) disconnected", slot, self.name(slot));
                    self.depart(slot).await;
                }
            }
        }

        for seat in &mut self.seats {
            seat.close();
        }

        let report = MatchReport {
            id: self.id,
            phase: self.game.phase(),
            board: self.game.board(),
            moves: self.game.moves(),
        };
        info!("Match {} ended: {:?} after {} moves", self.id, report.phase, report.moves);
        report
    }

    /// Introduce the players to each other and prompt slot one.
    async fn open_match(&mut self) {
        for slot in Slot::BOTH {
            let name = ServerMessage::Name {
                slot,
                opponent: self.name(slot.other()).to_string(),
            };
            self.send(slot, &name).await;
            if self.game.phase().is_terminal() {
                return;
            }
        }

        self.game.start();
        let play = self.play();
        self.broadcast(&play).await;
    }

    fn play(&self) -> ServerMessage {
        ServerMessage::Play {
            turn: self.game.turn(),
            board: self.game.board(),
        }
    }

    async fn handle_message(&mut self, slot: Slot, message: Message) {
        let fail = match ClientMessage::parse(&message) {
            Err(err) => {
                debug!("Unusable message from slot {}: {}", slot, err);
                ServerMessage::fail(FailCode::Invalid)
            }
            Ok(ClientMessage::Open { .. }) => ServerMessage::fail(FailCode::AlreadyOpen),
            Ok(ClientMessage::Move(request)) => match self.game.apply_move(slot, request) {
                Ok(MoveOutcome::Continue { turn }) => {
                    debug!("Slot {} moved; slot {} to play", slot, turn);
                    let play = self.play();
                    self.broadcast(&play).await;
                    return;
                }
                Ok(MoveOutcome::Won { winner }) => {
                    info!("Slot {} ({}) won match {}", winner, self.name(winner), self.id);
                    let over = ServerMessage::Over {
                        winner,
                        board: self.game.board(),
                        reason: String::new(),
                    };
                    self.broadcast(&over).await;
                    return;
                }
                Err(err) => ServerMessage::fail(FailCode::from(err)),
            },
            Ok(ClientMessage::Unexpected(_)) if slot == self.game.turn() => {
                ServerMessage::fail_with(FailCode::Impatient, EXPECTED_MOVE)
            }
            Ok(ClientMessage::Unexpected(_)) => ServerMessage::fail(FailCode::Impatient),
        };

        // In-match failures are recoverable: re-prompt with the board.
        self.send(slot, &fail).await;
        if !self.game.phase().is_terminal() {
            let play = self.play();
            self.send(slot, &play).await;
        }
    }

    /// Send to both seats. Stops early if a failed send ended the match.
    async fn broadcast(&mut self, message: &ServerMessage) {
        let was_live = !self.game.phase().is_terminal();
        for slot in Slot::BOTH {
            self.send(slot, message).await;
            if was_live && self.game.phase().is_terminal() {
                return;
            }
        }
    }

    /// Send to one seat. A failed write is treated as that player leaving.
    async fn send(&mut self, slot: Slot, message: &ServerMessage) {
        if !self.seats[slot.index()].is_connected() {
            return;
        }

        if let Err(err) = self.deliver(slot, message).await {
            debug!("Send to slot {} failed: {}", slot, err);
            self.depart(slot).await;
        }
    }

    async fn deliver(&mut self, slot: Slot, message: &ServerMessage) -> Result<(), SendError> {
        match self.seats[slot.index()].writer.as_mut() {
            Some(writer) => codec::write_message(writer, &message.to_wire_message()).await,
            None => Err(SendError::Io(std::io::ErrorKind::NotConnected.into())),
        }
    }

    /// `slot` is gone. Forfeit to the other seat if it can still be told,
    /// otherwise abort.
    async fn depart(&mut self, slot: Slot) {
        self.seats[slot.index()].close();

        if self.game.phase().is_terminal() {
            return;
        }

        let winner = slot.other();
        if !self.seats[winner.index()].is_connected() {
            self.game.abort();
            return;
        }

        let over = ServerMessage::Over {
            winner,
            board: self.game.board(),
            reason: FORFEIT_REASON.to_string(),
        };
        match self.deliver(winner, &over).await {
            Ok(()) => {
                self.game.forfeit(slot);
                info!("Slot {} ({}) wins match {} by forfeit", winner, self.name(winner), self.id);
            }
            Err(err) => {
                debug!("Forfeit notice to slot {} failed: {}", winner, err);
                self.seats[winner.index()].close();
                self.game.abort();
            }
        }
    }
}

/// Decode frames from one connection until it closes or sends garbage.
async fn read_loop<R>(slot: Slot, mut reader: R, events: mpsc::Sender<(Slot, Inbound)>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let event = match codec::read_message(&mut reader).await {
            Ok(message) => Inbound::Message(message),
            Err(err) if err.is_closed() => Inbound::Closed,
            Err(err) => Inbound::Malformed(err),
        };

        let last = !matches!(event, Inbound::Message(_));
        if events.send((slot, event)).await.is_err() || last {
            break;
        }
    }
}
