//! Game Server
//!
//! Accept loop and task layout:
//!
//! - one handshake task per connection reads the opening OPEN, registers the
//!   name and answers WAIT, so the accept loop never waits on client data;
//! - one matchmaking task owns the waiting queue and polls the waiting
//!   player's connection for closure;
//! - one task per paired match, watched so that a panic is logged.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::network::codec::{self, SendError};
use crate::network::matchmaker::{Matchmaker, Pairing};
use crate::network::player::Player;
use crate::network::protocol::{ClientMessage, FailCode, ServerMessage};
use crate::network::registry::NameRegistry;
use crate::network::session::MatchSession;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// How often the waiting player's connection is checked.
    pub liveness_poll: Duration,
    /// Validated players buffered between handshakes and the matchmaker.
    pub handoff_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9000)),
            liveness_poll: Duration::from_millis(100),
            handoff_capacity: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on all interfaces at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

/// Game server errors.
#[derive(Debug, Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Why a connection never reached the matchmaker.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Peer closed before sending a complete frame.
    #[error("peer closed before OPEN")]
    Closed,

    /// Opening message refused.
    #[error("rejected: {}", .0.text())]
    Rejected(FailCode),

    /// WAIT could not be delivered.
    #[error("send failed: {0}")]
    Send(#[from] SendError),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Bound listener.
    listener: TcpListener,
    /// Names of queued and playing clients.
    registry: Arc<NameRegistry>,
    /// Shutdown signal.
    shutdown_tx: watch::Sender<bool>,
}

impl GameServer {
    /// Bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, GameServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            listener,
            registry: NameRegistry::new(),
            shutdown_tx,
        })
    }

    /// Address actually bound, useful when the configured port is 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared name registry.
    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }

    /// Stop accepting connections. Matches already running play on.
    ///
    /// The flag persists, so a call made before [`run`](Self::run) starts
    /// still stops it.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Run the server until [`shutdown`](Self::shutdown) is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            "nimd v{} listening on {}",
            self.config.version,
            self.listener.local_addr()?
        );

        let (handoff_tx, handoff_rx) = mpsc::channel(self.config.handoff_capacity);

        let liveness_poll = self.config.liveness_poll;
        let matchmaking_handle = tokio::spawn(async move {
            Self::run_matchmaking_loop(handoff_rx, liveness_poll).await;
        });

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr, handoff_tx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.wait_for(|stop| *stop).map(|_| ()) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        matchmaking_handle.abort();

        Ok(())
    }

    /// Spawn the handshake for a new connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        handoff: mpsc::Sender<Player>,
    ) {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let mut player = Player::new(stream, addr);

            match Self::handshake(&mut player, &registry).await {
                Ok(()) => {
                    if handoff.send(player).await.is_err() {
                        warn!("Matchmaker stopped; dropping {}", addr);
                    }
                }
                Err(HandshakeError::Rejected(code)) => {
                    info!("Rejecting {}: FAIL {:02} {}", addr, code.code(), code.text());
                    // The connection closes once the FAIL is out.
                    if let Err(e) = player.send(&ServerMessage::fail(code)).await {
                        debug!("FAIL to {} not delivered: {}", addr, e);
                    }
                }
                Err(e) => {
                    debug!("Handshake with {} ended: {}", addr, e);
                }
            }
        });
    }

    /// Read the opening message, register the name and answer WAIT.
    ///
    /// On success the player holds its name lease and is ready to queue.
    pub async fn handshake(
        player: &mut Player,
        registry: &Arc<NameRegistry>,
    ) -> Result<(), HandshakeError> {
        let message = match codec::read_message(player.stream_mut()).await {
            Ok(message) => message,
            Err(e) if e.is_closed() => return Err(HandshakeError::Closed),
            Err(e) => {
                debug!("Malformed opening frame from {}: {}", player.addr(), e);
                return Err(HandshakeError::Rejected(FailCode::Invalid));
            }
        };

        let name = match ClientMessage::parse(&message) {
            Ok(ClientMessage::Open { name }) => name,
            Ok(ClientMessage::Move(_)) => return Err(HandshakeError::Rejected(FailCode::NotPlaying)),
            Ok(ClientMessage::Unexpected(_)) | Err(_) => {
                return Err(HandshakeError::Rejected(FailCode::Invalid));
            }
        };

        player
            .open(registry, &name)
            .map_err(|e| HandshakeError::Rejected(FailCode::from(e)))?;

        player.send(&ServerMessage::Wait).await?;
        debug!("{} opened as {:?}", player.addr(), name);

        Ok(())
    }

    /// Pair validated players and evict a waiting player that hung up.
    async fn run_matchmaking_loop(mut handoff: mpsc::Receiver<Player>, liveness_poll: Duration) {
        let mut matchmaker = Matchmaker::new();
        let mut liveness = interval(liveness_poll);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                player = handoff.recv() => {
                    let Some(player) = player else { break };
                    if let Pairing::Paired(first, second) = matchmaker.enqueue_or_pair(player) {
                        Self::spawn_match(first, second);
                    }
                }
                _ = liveness.tick() => {
                    matchmaker.evict_if_closed();
                }
            }
        }

        debug!("Matchmaking loop finished");
    }

    /// Run a match in its own task and log how it ended.
    fn spawn_match(first: Player, second: Player) {
        let id = Uuid::new_v4();
        let session = tokio::spawn(MatchSession::new(id, first, second).run());

        tokio::spawn(async move {
            match session.await {
                Ok(report) => debug!("Match {} reaped: {:?}", id, report.phase),
                Err(e) if e.is_panic() => error!("Match {} panicked: {}", id, e),
                Err(e) => warn!("Match {} cancelled: {}", id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::codec::read_message;
    use tokio::io::AsyncWriteExt;

    async fn connection() -> (Player, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, addr) = listener.accept().await.unwrap();
        (Player::new(server, addr), client)
    }

    fn rejected_with(result: Result<(), HandshakeError>) -> FailCode {
        match result {
            Err(HandshakeError::Rejected(code)) => code,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 9000);
        assert!(config.handoff_capacity > 0);
        assert!(!config.version.is_empty());
    }

    #[test]
    fn test_config_with_port() {
        let config = ServerConfig::with_port(4242);
        assert_eq!(config.bind_addr.port(), 4242);
        assert!(config.bind_addr.ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let mut config = ServerConfig::with_port(0);
        config.bind_addr = "127.0.0.1:0".parse().unwrap();

        let server = GameServer::bind(config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bind_conflict_fails() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ServerConfig::default();
        config.bind_addr = taken.local_addr().unwrap();

        assert!(matches!(
            GameServer::bind(config).await,
            Err(GameServerError::BindFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_open_answers_wait() {
        let registry = NameRegistry::new();
        let (mut player, mut client) = connection().await;

        client.write_all(b"0|11|OPEN|Alice|").await.unwrap();
        GameServer::handshake(&mut player, &registry).await.unwrap();

        assert_eq!(player.name(), Some("Alice"));
        assert!(registry.contains("Alice"));
        assert_eq!(read_message(&mut client).await.unwrap().kind(), "WAIT");
    }

    #[tokio::test]
    async fn test_handshake_rejections() {
        let registry = NameRegistry::new();
        let _held = registry
            .register("Alice", "127.0.0.1:1".parse().unwrap())
            .unwrap();

        let cases: [(&[u8], FailCode); 6] = [
            (b"X", FailCode::Invalid),
            (b"0|09|MOVE|1|1|", FailCode::NotPlaying),
            (b"0|05|WAIT|", FailCode::Invalid),
            (b"0|05|OPEN|", FailCode::Invalid),
            (b"0|06|OPEN||", FailCode::InvalidName),
            (b"0|11|OPEN|Alice|", FailCode::AlreadyPlaying),
        ];

        for (bytes, expected) in cases {
            let (mut player, mut client) = connection().await;
            client.write_all(bytes).await.unwrap();

            let code = rejected_with(GameServer::handshake(&mut player, &registry).await);
            assert_eq!(code, expected, "for {:?}", String::from_utf8_lossy(bytes));
            assert!(!player.is_open());
        }

        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_handshake_peer_closed() {
        let registry = NameRegistry::new();
        let (mut player, client) = connection().await;
        drop(client);

        assert!(matches!(
            GameServer::handshake(&mut player, &registry).await,
            Err(HandshakeError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let mut config = ServerConfig::default();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let server = Arc::new(GameServer::bind(config).await.unwrap());
        let addr = server.local_addr().unwrap();

        let runner = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };

        // A completed handshake proves the loop is up.
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"0|11|OPEN|Alice|").await.unwrap();
        assert_eq!(read_message(&mut client).await.unwrap().kind(), "WAIT");

        server.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_run_is_honored() {
        let mut config = ServerConfig::default();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let server = GameServer::bind(config).await.unwrap();

        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), server.run()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
