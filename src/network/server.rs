//! WebSocket Authority Server
//!
//! One authority process multiplexing many client connections. Each
//! connection gets a reader task and a writer task; everything they produce
//! funnels into a single authority event queue, so all writes to canonical
//! state are serialized by construction. Replication flushes after every
//! applied event (broadcast-on-change).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::game::intent::IntentCommand;
use crate::game::state::ClientId;
use crate::network::protocol::{ClientMessage, ErrorCode, MotionDelta, ServerMessage};
use crate::replication::arbiter::{AuthorityArbiter, AuthorityContext};
use crate::replication::session::{ReplicationHub, SESSION_CHANNEL_CAPACITY};

/// Capacity of the authority event queue.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static addr"),
            max_connections: 10,
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Everything the authority task consumes, in one explicit queue.
///
/// Connect/disconnect travel through the same queue as intents, so entity
/// lifecycle and the player counter see a single total order of events.
#[derive(Debug)]
pub enum AuthorityEvent {
    /// A connection was established and its entity should spawn.
    Connected {
        /// Assigned connection id.
        id: ClientId,
        /// Outbound channel to the new client.
        sender: mpsc::Sender<ServerMessage>,
    },
    /// A connection closed.
    Disconnected {
        /// The departed connection.
        id: ClientId,
    },
    /// An intent command arrived.
    Intent {
        /// Connection that sent the command.
        sender: ClientId,
        /// Entity the command addresses.
        entity: ClientId,
        /// The command.
        command: IntentCommand,
    },
}

/// Consume the authority event queue until every sender is gone.
///
/// This is the whole authority: it owns the context and hub, applies each
/// event through the arbiter, and flushes dirty fields after each one. A
/// periodic retry flush re-sends commits that a full subscriber channel
/// bounced, so a silent subscriber still converges without new events. It
/// is a plain async function so tests can drive it over in-process channels
/// without any sockets.
pub async fn run_authority_loop(mut events: mpsc::Receiver<AuthorityEvent>) {
    let mut ctx = AuthorityContext::new();
    let mut hub = ReplicationHub::new();
    let mut retry = tokio::time::interval(Duration::from_secs(1) / crate::TICK_RATE);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let mut arbiter = AuthorityArbiter::new(&mut ctx, &mut hub);
                match event {
                    AuthorityEvent::Connected { id, sender } => arbiter.handle_connect(id, sender),
                    AuthorityEvent::Disconnected { id } => arbiter.handle_disconnect(id),
                    AuthorityEvent::Intent { sender, entity, command } => {
                        arbiter.apply(sender, entity, command)
                    }
                }
                arbiter.flush();
            }
            _ = retry.tick() => {
                AuthorityArbiter::new(&mut ctx, &mut hub).flush();
            }
        }
    }

    debug!("authority queue closed, loop ending");
    hub.broadcast(ServerMessage::Shutdown { reason: "server shutting down".to_string() });
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Active connection count.
    connections: Arc<AtomicUsize>,
    /// Next connection id.
    next_id: Arc<AtomicU64>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            connections: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
            shutdown_tx,
        }
    }

    /// Signal the server to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the server until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run on an already-bound listener (tests bind an ephemeral port).
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let authority = tokio::spawn(run_authority_loop(event_rx));

        let started = Instant::now();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(reject_connection(stream));
                                continue;
                            }

                            let id = ClientId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                            info!("New connection from {} as client {}", addr, id);
                            self.connections.fetch_add(1, Ordering::SeqCst);

                            let connections = self.connections.clone();
                            let event_tx = event_tx.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, id, event_tx, started).await;
                                connections.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Dropping the last event sender ends the authority loop.
        drop(event_tx);
        let _ = authority.await;

        Ok(())
    }
}

/// Complete the handshake just long enough to tell the client the server is
/// full, then close.
async fn reject_connection(stream: TcpStream) {
    let mut ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    let message = ServerMessage::Error {
        code: ErrorCode::ServerFull,
        message: "Connection limit reached".to_string(),
    };
    if let Ok(text) = message.to_json() {
        let _ = ws_stream.send(Message::Text(text)).await;
    }
    let _ = ws_stream.close(None).await;
}

/// Drive one client connection: handshake, register with the authority,
/// pump messages both ways, deregister on close.
async fn handle_connection(
    stream: TcpStream,
    id: ClientId,
    event_tx: mpsc::Sender<AuthorityEvent>,
    started: Instant,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for client {}: {}", id, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(SESSION_CHANNEL_CAPACITY);

    if event_tx
        .send(AuthorityEvent::Connected { id, sender: msg_tx.clone() })
        .await
        .is_err()
    {
        // Authority already gone; nothing to join.
        return;
    }

    // Writer task: serialize authority traffic out to the socket.
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: translate wire messages into authority events.
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match ClientMessage::from_json(&text) {
                    Ok(client_msg) => {
                        if !dispatch_client_message(id, client_msg, &event_tx, &msg_tx, started)
                            .await
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Malformed message from client {}: {}", id, e);
                        let _ = msg_tx
                            .try_send(ServerMessage::Error {
                                code: ErrorCode::MalformedMessage,
                                message: e.to_string(),
                            });
                    }
                }
            }
            // Binary frames carry the flat motion delta for the client's own
            // entity (the highest-rate message kind).
            Ok(Message::Binary(data)) => match MotionDelta::from_bytes(&data) {
                Ok(delta) => {
                    let _ = event_tx
                        .send(AuthorityEvent::Intent {
                            sender: id,
                            entity: id,
                            command: delta.into_command(),
                        })
                        .await;
                }
                Err(e) => {
                    debug!("Malformed binary frame from client {}: {}", id, e);
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket error for client {}: {}", id, e);
                break;
            }
        }
    }

    let _ = event_tx.send(AuthorityEvent::Disconnected { id }).await;
    sender_task.abort();
}

/// Handle one parsed client message. Returns false when the connection
/// should close.
async fn dispatch_client_message(
    id: ClientId,
    message: ClientMessage,
    event_tx: &mpsc::Sender<AuthorityEvent>,
    msg_tx: &mpsc::Sender<ServerMessage>,
    started: Instant,
) -> bool {
    match message {
        ClientMessage::Intent { entity, command } => {
            let _ = event_tx
                .send(AuthorityEvent::Intent { sender: id, entity, command })
                .await;
            true
        }
        ClientMessage::Ping { timestamp } => {
            let _ = msg_tx.try_send(ServerMessage::Pong {
                timestamp,
                server_time: started.elapsed().as_millis() as u64,
            });
            true
        }
        ClientMessage::Leave => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::Vec3;
    use crate::game::state::{CombatState, DEFAULT_HEALTH};
    use crate::network::protocol::FieldValue;
    use crate::replication::session::ReplicaView;

    async fn connect(
        event_tx: &mpsc::Sender<AuthorityEvent>,
        id: u64,
    ) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        event_tx
            .send(AuthorityEvent::Connected { id: ClientId::new(id), sender: tx })
            .await
            .unwrap();
        rx
    }

    async fn send_intent(
        event_tx: &mpsc::Sender<AuthorityEvent>,
        sender: u64,
        entity: u64,
        command: IntentCommand,
    ) {
        event_tx
            .send(AuthorityEvent::Intent {
                sender: ClientId::new(sender),
                entity: ClientId::new(entity),
                command,
            })
            .await
            .unwrap();
    }

    /// Drive the authority loop over in-process channels and rebuild each
    /// observer's view from what it actually received.
    #[tokio::test]
    async fn test_authority_loop_end_to_end() {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let authority = tokio::spawn(run_authority_loop(event_rx));

        let mut rx1 = connect(&event_tx, 1).await;

        send_intent(
            &event_tx,
            1,
            1,
            IntentCommand::Motion {
                position_delta: Vec3::new(0.0, 0.0, 1.0),
                rotation_delta: Vec3::ZERO,
            },
        )
        .await;
        send_intent(
            &event_tx,
            1,
            1,
            IntentCommand::SetCombatState { state: CombatState::Punching },
        )
        .await;

        // A late joiner must see present state, not history.
        let mut rx2 = connect(&event_tx, 2).await;

        send_intent(
            &event_tx,
            2,
            2,
            IntentCommand::Damage { target: ClientId::new(1), amount: 10.0 },
        )
        .await;

        drop(event_tx);
        authority.await.unwrap();

        let mut view1 = ReplicaView::new();
        let mut health_notice = None;
        while let Ok(msg) = rx1.try_recv() {
            if let ServerMessage::HealthChanged { health, source } = &msg {
                health_notice = Some((*health, *source));
            }
            view1.apply(msg);
        }

        let mut view2 = ReplicaView::new();
        while let Ok(msg) = rx2.try_recv() {
            view2.apply(msg);
        }

        // Both observers converge on the same final state.
        for view in [&view1, &view2] {
            let e1 = view.entity(&ClientId::new(1)).unwrap();
            assert_eq!(e1.health, DEFAULT_HEALTH - 10.0);
            assert_eq!(e1.combat_state, CombatState::Punching);
            assert!((0.0..1.0).contains(&e1.punch_blend));
            assert_eq!(view.player_count(), 2);
        }

        // Position moved by exactly the one applied delta.
        let p1 = view1.entity(&ClientId::new(1)).unwrap().position;
        let p2 = view2.entity(&ClientId::new(1)).unwrap().position;
        assert_eq!(p1, p2);

        // The damage side channel reached entity 1's own connection.
        assert_eq!(health_notice, Some((DEFAULT_HEALTH - 10.0, ClientId::new(2))));
        assert_eq!(view1.local_id(), Some(ClientId::new(1)));
        assert_eq!(view2.local_id(), Some(ClientId::new(2)));
    }

    #[tokio::test]
    async fn test_late_joiner_gets_snapshot_not_deltas() {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let authority = tokio::spawn(run_authority_loop(event_rx));

        let _rx1 = connect(&event_tx, 1).await;
        for _ in 0..5 {
            send_intent(
                &event_tx,
                1,
                1,
                IntentCommand::Motion {
                    position_delta: Vec3::new(0.0, 0.0, 1.0),
                    rotation_delta: Vec3::ZERO,
                },
            )
            .await;
        }

        let mut rx2 = connect(&event_tx, 2).await;
        drop(event_tx);
        authority.await.unwrap();

        // The first message the late joiner sees is the welcome carrying
        // entity 1 at its *current* position.
        let first = rx2.try_recv().unwrap();
        match first {
            ServerMessage::Welcome { entities, .. } => {
                let e1 = entities.iter().find(|e| e.id == ClientId::new(1)).unwrap();
                let position = e1
                    .fields
                    .iter()
                    .find_map(|f| match &f.value {
                        FieldValue::Position { value } => Some(*value),
                        _ => None,
                    })
                    .unwrap();
                // Spawned somewhere in the plane, then moved +5 on Z.
                assert!(position.z >= 1.0);
            }
            other => panic!("expected welcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_tears_down_entity() {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let authority = tokio::spawn(run_authority_loop(event_rx));

        let mut rx1 = connect(&event_tx, 1).await;
        let _rx2 = connect(&event_tx, 2).await;

        event_tx
            .send(AuthorityEvent::Disconnected { id: ClientId::new(2) })
            .await
            .unwrap();

        // Commands racing the disconnect are dropped, not fatal.
        send_intent(
            &event_tx,
            2,
            2,
            IntentCommand::SetCombatState { state: CombatState::Punching },
        )
        .await;

        drop(event_tx);
        authority.await.unwrap();

        let mut view = ReplicaView::new();
        while let Ok(msg) = rx1.try_recv() {
            view.apply(msg);
        }

        assert!(view.entity(&ClientId::new(2)).is_none());
        assert_eq!(view.player_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_subscribers() {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let authority = tokio::spawn(run_authority_loop(event_rx));

        let mut rx1 = connect(&event_tx, 1).await;
        drop(event_tx);
        authority.await.unwrap();

        let mut saw_shutdown = false;
        while let Ok(msg) = rx1.try_recv() {
            saw_shutdown = matches!(msg, ServerMessage::Shutdown { .. });
        }
        // The shutdown notice is the last thing the subscriber hears.
        assert!(saw_shutdown);
    }

    #[tokio::test]
    async fn test_full_server_rejects_with_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Arc::new(GameServer::new(ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        }));
        let running = server.clone();
        let task = tokio::spawn(async move { running.run_with_listener(listener).await });

        let (mut ws_stream, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let frame = ws_stream.next().await.unwrap().unwrap();
        let message = ServerMessage::from_json(frame.to_text().unwrap()).unwrap();
        assert!(matches!(
            message,
            ServerMessage::Error { code: ErrorCode::ServerFull, .. }
        ));

        server.shutdown();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.bind_addr.port(), 8080);
    }
}
