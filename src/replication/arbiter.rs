//! Authority Arbitration
//!
//! The single owner of write access to all replicated entity state. The
//! `AuthorityContext` is an explicit object (not a process-wide singleton)
//! so tests can run multiple independent authorities; it lives inside the
//! authority task, which serializes every write by construction.
//!
//! Failure semantics: arbitration never propagates an error to the
//! transport. Invalid or unauthorized commands are dropped with a
//! diagnostic log and no state change; lost commands just delay convergence
//! by one input sample.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::vec3::Vec3;
use crate::game::intent::IntentCommand;
use crate::game::state::{
    ClientId, CombatState, MotionState, DEFAULT_HEALTH, SPAWN_RANGE,
};
use crate::network::protocol::{EntitySnapshot, FieldId, FieldUpdate, FieldValue, ServerMessage};
use crate::replication::session::ReplicationHub;
use crate::replication::value::ReplicatedValue;

/// Arbitration failures. Logged and dropped at the boundary, never sent
/// back to the client.
#[derive(Debug, Clone, Error)]
pub enum ArbiterError {
    /// Command addressed an entity that is not (or no longer) connected.
    #[error("unknown entity {0}")]
    UnknownEntity(ClientId),

    /// Sender is not the owning connection of the addressed entity.
    #[error("connection {sender} does not own entity {entity}")]
    NotOwner {
        /// Command sender.
        sender: ClientId,
        /// Addressed entity.
        entity: ClientId,
    },
}

// =============================================================================
// PLAYER ENTITY
// =============================================================================

/// The replicated fields of one controllable actor.
///
/// Fields persist only for the entity's connected lifetime; there is no
/// durable storage.
#[derive(Debug)]
pub struct PlayerEntity {
    /// Entity identifier (owning connection id).
    pub id: ClientId,
    /// Display name, authority-assigned at spawn.
    pub name: ReplicatedValue<String>,
    /// World position.
    pub position: ReplicatedValue<Vec3>,
    /// Euler rotation.
    pub rotation: ReplicatedValue<Vec3>,
    /// Locomotion state.
    pub motion_state: ReplicatedValue<MotionState>,
    /// Combat state.
    pub combat_state: ReplicatedValue<CombatState>,
    /// Health, floored at zero.
    pub health: ReplicatedValue<f32>,
    /// Punch animation blend, authority-randomized per punch.
    pub punch_blend: ReplicatedValue<f32>,
}

impl PlayerEntity {
    /// Create a freshly spawned entity at `position`.
    pub fn spawn(id: ClientId, position: Vec3) -> Self {
        Self {
            id,
            name: ReplicatedValue::new(format!("Player {id}")),
            position: ReplicatedValue::new(position),
            rotation: ReplicatedValue::new(Vec3::ZERO),
            motion_state: ReplicatedValue::default(),
            combat_state: ReplicatedValue::default(),
            health: ReplicatedValue::new(DEFAULT_HEALTH),
            punch_blend: ReplicatedValue::new(0.0),
        }
    }

    /// Present state of every field, for spawns and late-join sync.
    pub fn snapshot(&self) -> EntitySnapshot {
        let mut fields = Vec::with_capacity(7);
        let (version, value) = self.name.snapshot();
        fields.push(FieldUpdate { version, value: FieldValue::Name { value } });
        let (version, value) = self.position.snapshot();
        fields.push(FieldUpdate { version, value: FieldValue::Position { value } });
        let (version, value) = self.rotation.snapshot();
        fields.push(FieldUpdate { version, value: FieldValue::Rotation { value } });
        let (version, value) = self.motion_state.snapshot();
        fields.push(FieldUpdate { version, value: FieldValue::MotionState { value } });
        let (version, value) = self.combat_state.snapshot();
        fields.push(FieldUpdate { version, value: FieldValue::CombatState { value } });
        let (version, value) = self.health.snapshot();
        fields.push(FieldUpdate { version, value: FieldValue::Health { value } });
        let (version, value) = self.punch_blend.snapshot();
        fields.push(FieldUpdate { version, value: FieldValue::PunchBlend { value } });
        EntitySnapshot { id: self.id, fields }
    }

    /// Drain all pending field broadcasts.
    fn drain_dirty(&mut self) -> Vec<(u64, FieldValue)> {
        let mut out = Vec::new();
        if let Some((version, value)) = self.name.take_dirty() {
            out.push((version, FieldValue::Name { value }));
        }
        if let Some((version, value)) = self.position.take_dirty() {
            out.push((version, FieldValue::Position { value }));
        }
        if let Some((version, value)) = self.rotation.take_dirty() {
            out.push((version, FieldValue::Rotation { value }));
        }
        if let Some((version, value)) = self.motion_state.take_dirty() {
            out.push((version, FieldValue::MotionState { value }));
        }
        if let Some((version, value)) = self.combat_state.take_dirty() {
            out.push((version, FieldValue::CombatState { value }));
        }
        if let Some((version, value)) = self.health.take_dirty() {
            out.push((version, FieldValue::Health { value }));
        }
        if let Some((version, value)) = self.punch_blend.take_dirty() {
            out.push((version, FieldValue::PunchBlend { value }));
        }
        out
    }
}

// =============================================================================
// AUTHORITY CONTEXT
// =============================================================================

/// Canonical world state owned by the authority.
#[derive(Debug)]
pub struct AuthorityContext {
    entities: BTreeMap<ClientId, PlayerEntity>,
    player_count: ReplicatedValue<u32>,
    rng: SmallRng,
}

impl AuthorityContext {
    /// Create a context with entropy-seeded randomness.
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Create a context with a fixed seed (tests).
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            entities: BTreeMap::new(),
            player_count: ReplicatedValue::new(0),
            rng,
        }
    }

    /// Number of currently connected player entities.
    pub fn player_count(&self) -> u32 {
        *self.player_count.read()
    }

    /// Versioned player count for the welcome snapshot.
    pub fn player_count_snapshot(&self) -> (u64, u32) {
        self.player_count.snapshot()
    }

    /// Drain the pending player-count broadcast, if any.
    pub fn take_player_count_dirty(&mut self) -> Option<(u64, u32)> {
        self.player_count.take_dirty()
    }

    /// Re-arm the player-count broadcast after a failed delivery.
    pub fn mark_player_count_dirty(&mut self) {
        self.player_count.mark_dirty();
    }

    /// Re-arm one field's broadcast after a failed delivery. The next flush
    /// re-sends the committed value at its current version.
    pub fn mark_field_dirty(&mut self, id: &ClientId, field: FieldId) {
        let Some(entity) = self.entities.get_mut(id) else {
            return;
        };
        match field {
            FieldId::Name => entity.name.mark_dirty(),
            FieldId::Position => entity.position.mark_dirty(),
            FieldId::Rotation => entity.rotation.mark_dirty(),
            FieldId::MotionState => entity.motion_state.mark_dirty(),
            FieldId::CombatState => entity.combat_state.mark_dirty(),
            FieldId::Health => entity.health.mark_dirty(),
            FieldId::PunchBlend => entity.punch_blend.mark_dirty(),
        }
    }

    /// Look up an entity.
    pub fn entity(&self, id: &ClientId) -> Option<&PlayerEntity> {
        self.entities.get(id)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Present state of every live entity.
    pub fn snapshot_all(&self) -> Vec<EntitySnapshot> {
        self.entities.values().map(PlayerEntity::snapshot).collect()
    }

    /// Drain all pending field broadcasts from all entities.
    pub fn drain_dirty_fields(&mut self) -> Vec<(ClientId, Vec<(u64, FieldValue)>)> {
        self.entities
            .iter_mut()
            .filter_map(|(id, entity)| {
                let updates = entity.drain_dirty();
                (!updates.is_empty()).then_some((*id, updates))
            })
            .collect()
    }

    /// Spawn an entity at a random point on the XZ plane. Returns `None`
    /// when an entity with this id is already live.
    fn spawn_entity(&mut self, id: ClientId) -> Option<&PlayerEntity> {
        match self.entities.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (lo, hi) = SPAWN_RANGE;
                let position =
                    Vec3::new(self.rng.gen_range(lo..=hi), 0.0, self.rng.gen_range(lo..=hi));
                Some(slot.insert(PlayerEntity::spawn(id, position)))
            }
        }
    }

    fn despawn_entity(&mut self, id: &ClientId) -> bool {
        self.entities.remove(id).is_some()
    }
}

impl Default for AuthorityContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// AUTHORITY ARBITER
// =============================================================================

/// Per-command arbitration over the authority context, wired to the
/// replication hub for fan-out and the damage side channel.
pub struct AuthorityArbiter<'a> {
    ctx: &'a mut AuthorityContext,
    hub: &'a mut ReplicationHub,
}

impl<'a> AuthorityArbiter<'a> {
    /// Borrow the context and hub for a batch of commands.
    pub fn new(ctx: &'a mut AuthorityContext, hub: &'a mut ReplicationHub) -> Self {
        Self { ctx, hub }
    }

    /// A connection joined: spawn its entity, bump the player counter,
    /// announce the spawn, and synchronize the newcomer to present state.
    pub fn handle_connect(&mut self, id: ClientId, sender: mpsc::Sender<ServerMessage>) {
        // The counter mirrors live entities exactly: a redelivered connect
        // event for an id that already has an entity must not bump it.
        let Some(snapshot) = self.ctx.spawn_entity(id).map(PlayerEntity::snapshot) else {
            warn!(client_id = id.0, "duplicate connect for live entity ignored");
            return;
        };

        info!("Client {id} has connected.");
        self.ctx.player_count.update(|c| c + 1);

        // Existing observers learn about the spawn; the newcomer gets the
        // whole present world (its own entity included) in the welcome.
        self.hub.broadcast(ServerMessage::EntitySpawned { snapshot });
        self.hub.subscribe(id, sender);
        self.hub.send_welcome(self.ctx, id);
    }

    /// A connection left: tear down its entity and subscription.
    ///
    /// In-flight commands from or to this entity become no-ops; other
    /// entities are untouched.
    pub fn handle_disconnect(&mut self, id: ClientId) {
        info!("Client {id} has been disconnected.");

        self.hub.unsubscribe(&id);
        if !self.ctx.despawn_entity(&id) {
            warn!(client_id = id.0, "disconnect for unknown entity ignored");
            return;
        }

        // The counter mirrors live entities and can never go negative: the
        // decrement only happens when a despawn actually occurred.
        self.ctx.player_count.update(|c| c.saturating_sub(1));
        self.hub.broadcast(ServerMessage::EntityDespawned { id });
    }

    /// Apply one intent command. Errors are logged and dropped here; the
    /// transport never sees them.
    pub fn apply(&mut self, sender: ClientId, entity: ClientId, command: IntentCommand) {
        let result = match command {
            IntentCommand::Motion { position_delta, rotation_delta } => {
                self.apply_motion(sender, entity, position_delta, rotation_delta)
            }
            IntentCommand::SetMotionState { state } => {
                self.apply_motion_state(sender, entity, state)
            }
            IntentCommand::SetCombatState { state } => {
                self.apply_combat_state(sender, entity, state)
            }
            IntentCommand::Damage { target, amount } => {
                self.apply_damage(sender, target, amount)
            }
        };

        if let Err(e) = result {
            warn!(sender = sender.0, "command dropped: {e}");
        }
    }

    /// Broadcast every dirty field committed since the last flush.
    pub fn flush(&mut self) {
        self.hub.flush(self.ctx);
    }

    /// Apply a client-reported movement delta.
    ///
    /// The delta is trusted as-is (no speed or teleport bound); the owning
    /// client is authoritative over its own motion. Duplicate deliveries are
    /// applied additively, an accepted drift. Zero components commit
    /// nothing, so a stationary tick does not rebroadcast the field.
    fn apply_motion(
        &mut self,
        sender: ClientId,
        entity: ClientId,
        position_delta: Vec3,
        rotation_delta: Vec3,
    ) -> Result<(), ArbiterError> {
        let target = self.owned_entity_mut(sender, entity)?;
        if !position_delta.is_zero() {
            target.position.update(|p| *p + position_delta);
        }
        if !rotation_delta.is_zero() {
            target.rotation.update(|r| *r + rotation_delta);
        }
        Ok(())
    }

    /// Set the motion state. Memoryless: no validation against the prior
    /// state. Re-sends of the current state commit nothing.
    fn apply_motion_state(
        &mut self,
        sender: ClientId,
        entity: ClientId,
        state: MotionState,
    ) -> Result<(), ArbiterError> {
        let target = self.owned_entity_mut(sender, entity)?;
        if *target.motion_state.read() != state {
            target.motion_state.write(state);
        }
        Ok(())
    }

    /// Set the combat state. Entering Punching assigns a fresh random blend
    /// in [0, 1) chosen by the authority, so every observer plays the same
    /// variation.
    fn apply_combat_state(
        &mut self,
        sender: ClientId,
        entity: ClientId,
        state: CombatState,
    ) -> Result<(), ArbiterError> {
        if sender != entity {
            return Err(ArbiterError::NotOwner { sender, entity });
        }

        // Rolled before the mutable entity borrow; unused rolls are fine.
        let blend = self.ctx.rng.gen::<f32>();
        let target = self
            .ctx
            .entities
            .get_mut(&entity)
            .ok_or(ArbiterError::UnknownEntity(entity))?;

        if *target.combat_state.read() != state {
            if state == CombatState::Punching {
                target.punch_blend.write(blend);
            }
            target.combat_state.write(state);
        }
        Ok(())
    }

    /// Apply damage from `sender`'s punch to `target`.
    ///
    /// Any connected sender may damage another entity (hit detection runs on
    /// the puncher's client). Health is floored at zero, and the damaged
    /// entity's own connection gets a direct notification on top of the
    /// regular broadcast.
    fn apply_damage(
        &mut self,
        sender: ClientId,
        target: ClientId,
        amount: f32,
    ) -> Result<(), ArbiterError> {
        if !self.ctx.entities.contains_key(&sender) {
            return Err(ArbiterError::UnknownEntity(sender));
        }
        let victim = self
            .ctx
            .entities
            .get_mut(&target)
            .ok_or(ArbiterError::UnknownEntity(target))?;

        victim.health.update(|h| (h - amount).max(0.0));
        let health = *victim.health.read();
        info!("Player {target} has been hit. {health} HP left.");

        self.hub
            .send_to(&target, ServerMessage::HealthChanged { health, source: sender });
        Ok(())
    }

    fn owned_entity_mut(
        &mut self,
        sender: ClientId,
        entity: ClientId,
    ) -> Result<&mut PlayerEntity, ArbiterError> {
        if sender != entity {
            return Err(ArbiterError::NotOwner { sender, entity });
        }
        self.ctx
            .entities
            .get_mut(&entity)
            .ok_or(ArbiterError::UnknownEntity(entity))
    }
}
