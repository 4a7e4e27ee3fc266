//! Replication Sessions
//!
//! Per-connection bookkeeping for change fan-out. Each connected observer
//! holds a `ReplicationSession` with an outbound channel; the hub broadcasts
//! committed changes to all of them and carries the point-to-point side
//! channel used for damage feedback.
//!
//! Delivery guarantees: per-subscriber FIFO (the mpsc channel preserves
//! commit order), no ordering across subscribers, at-least-once tolerated by
//! the observer-side version check. Nothing here blocks: a subscriber whose
//! channel is full misses that delivery, and `flush` re-marks the field
//! dirty so the committed value goes out again on a later flush. Observers
//! that already saw it drop the duplicate by version.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::vec3::Vec3;
use crate::game::state::{ClientId, CombatState, MotionState};
use crate::network::protocol::{
    CounterUpdate, EntitySnapshot, FieldId, FieldValue, ServerMessage,
};
use crate::replication::arbiter::AuthorityContext;

/// Outbound channel capacity per subscriber.
pub const SESSION_CHANNEL_CAPACITY: usize = 256;

/// One connected observer.
#[derive(Debug)]
pub struct ReplicationSession {
    /// Connection identifier.
    pub client_id: ClientId,
    /// Outbound message channel to this observer.
    sender: mpsc::Sender<ServerMessage>,
}

impl ReplicationSession {
    /// Create a session around an outbound channel.
    pub fn new(client_id: ClientId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { client_id, sender }
    }

    /// Non-blocking send. A full or closed channel drops the message;
    /// convergence catches up on the next committed write.
    fn send(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(client_id = self.client_id.0, "dropped outbound message: {}", e);
                false
            }
        }
    }
}

// =============================================================================
// REPLICATION HUB
// =============================================================================

/// Fan-out of authority-committed state to every connected observer.
#[derive(Debug, Default)]
pub struct ReplicationHub {
    sessions: BTreeMap<ClientId, ReplicationSession>,
}

impl ReplicationHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Returns false if the id is already subscribed.
    pub fn subscribe(&mut self, client_id: ClientId, sender: mpsc::Sender<ServerMessage>) -> bool {
        if self.sessions.contains_key(&client_id) {
            warn!(client_id = client_id.0, "duplicate subscription ignored");
            return false;
        }
        self.sessions.insert(client_id, ReplicationSession::new(client_id, sender));
        true
    }

    /// Remove an observer. Further commits no longer reach it.
    pub fn unsubscribe(&mut self, client_id: &ClientId) -> bool {
        self.sessions.remove(client_id).is_some()
    }

    /// Number of subscribed observers.
    pub fn subscriber_count(&self) -> usize {
        self.sessions.len()
    }

    /// Broadcast a message to every subscriber. Returns false when at least
    /// one subscriber's channel was full or closed.
    pub fn broadcast(&self, message: ServerMessage) -> bool {
        let mut delivered_to_all = true;
        for session in self.sessions.values() {
            delivered_to_all &= session.send(message.clone());
        }
        delivered_to_all
    }

    /// Point-to-point send to one subscriber (the damage side channel).
    pub fn send_to(&self, client_id: &ClientId, message: ServerMessage) -> bool {
        match self.sessions.get(client_id) {
            Some(session) => session.send(message),
            None => {
                debug!(client_id = client_id.0, "direct send to absent subscriber dropped");
                false
            }
        }
    }

    /// Send the full-present-state welcome to a newly subscribed observer.
    ///
    /// Late joiners synchronize to current values, never to replayed
    /// history.
    pub fn send_welcome(&self, ctx: &AuthorityContext, client_id: ClientId) {
        let (version, count) = ctx.player_count_snapshot();
        let entities = ctx.snapshot_all();
        self.send_to(
            &client_id,
            ServerMessage::Welcome {
                client_id,
                player_count: CounterUpdate { version, count },
                entities,
            },
        );
    }

    /// Drain every dirty field from the context and broadcast the committed
    /// values in commit order.
    ///
    /// A field whose broadcast missed any subscriber is re-marked dirty, so
    /// the final committed value is re-sent on a later flush instead of
    /// being lost to a momentarily full channel.
    pub fn flush(&self, ctx: &mut AuthorityContext) {
        for (version, count) in ctx.take_player_count_dirty() {
            if !self.broadcast(ServerMessage::PlayerCountChanged { version, count }) {
                ctx.mark_player_count_dirty();
            }
        }

        for (entity, updates) in ctx.drain_dirty_fields() {
            for (version, value) in updates {
                let field = value.field_id();
                if !self.broadcast(ServerMessage::FieldChanged { entity, version, value }) {
                    ctx.mark_field_dirty(&entity, field);
                }
            }
        }
    }
}

// =============================================================================
// OBSERVER-SIDE MIRROR
// =============================================================================

/// Read-only mirror of one entity's replicated fields.
///
/// This is the surface the presentation layer reads; it has no write API.
#[derive(Debug, Clone, Default)]
pub struct EntityMirror {
    versions: BTreeMap<FieldId, u64>,
    /// Display name
    pub name: String,
    /// World position
    pub position: Vec3,
    /// Euler rotation
    pub rotation: Vec3,
    /// Locomotion state
    pub motion_state: MotionState,
    /// Combat state
    pub combat_state: CombatState,
    /// Health points
    pub health: f32,
    /// Punch animation blend
    pub punch_blend: f32,
}

impl EntityMirror {
    /// Apply one versioned field value, ignoring stale re-deliveries.
    fn apply(&mut self, version: u64, value: FieldValue) {
        let id = value.field_id();
        if self.versions.get(&id).is_some_and(|seen| version <= *seen) {
            return;
        }
        self.versions.insert(id, version);

        match value {
            FieldValue::Name { value } => self.name = value,
            FieldValue::Position { value } => self.position = value,
            FieldValue::Rotation { value } => self.rotation = value,
            FieldValue::MotionState { value } => self.motion_state = value,
            FieldValue::CombatState { value } => self.combat_state = value,
            FieldValue::Health { value } => self.health = value,
            FieldValue::PunchBlend { value } => self.punch_blend = value,
        }
    }
}

/// Observer-side world state, rebuilt from replication messages.
#[derive(Debug, Clone, Default)]
pub struct ReplicaView {
    local_id: Option<ClientId>,
    player_count: u32,
    player_count_version: u64,
    entities: BTreeMap<ClientId, EntityMirror>,
}

impl ReplicaView {
    /// Create an empty view (before the welcome arrives).
    pub fn new() -> Self {
        Self::default()
    }

    /// Id assigned to the local connection, once known.
    pub fn local_id(&self) -> Option<ClientId> {
        self.local_id
    }

    /// Replicated player count.
    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    /// Mirror of one entity, if present.
    pub fn entity(&self, id: &ClientId) -> Option<&EntityMirror> {
        self.entities.get(id)
    }

    /// All mirrored entities.
    pub fn entities(&self) -> impl Iterator<Item = (&ClientId, &EntityMirror)> {
        self.entities.iter()
    }

    /// Apply one inbound server message to the mirror.
    pub fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { client_id, player_count, entities } => {
                self.local_id = Some(client_id);
                self.player_count = player_count.count;
                self.player_count_version = player_count.version;
                self.entities.clear();
                for snapshot in entities {
                    self.apply_snapshot(snapshot);
                }
            }
            ServerMessage::EntitySpawned { snapshot } => {
                self.apply_snapshot(snapshot);
            }
            ServerMessage::EntityDespawned { id } => {
                self.entities.remove(&id);
            }
            ServerMessage::FieldChanged { entity, version, value } => {
                // Updates for unknown entities can race a despawn; drop them.
                if let Some(mirror) = self.entities.get_mut(&entity) {
                    mirror.apply(version, value);
                }
            }
            ServerMessage::PlayerCountChanged { version, count } => {
                if version > self.player_count_version {
                    self.player_count_version = version;
                    self.player_count = count;
                }
            }
            // Direct/control messages carry no mirrored state.
            ServerMessage::HealthChanged { .. }
            | ServerMessage::Pong { .. }
            | ServerMessage::Error { .. }
            | ServerMessage::Shutdown { .. } => {}
        }
    }

    fn apply_snapshot(&mut self, snapshot: EntitySnapshot) {
        let mirror = self.entities.entry(snapshot.id).or_default();
        for update in snapshot.fields {
            mirror.apply(update.version, update.value);
        }
    }
}
