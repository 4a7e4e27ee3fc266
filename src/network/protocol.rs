//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease, with binary
//! (bincode) helpers for the flat motion-delta struct.

use serde::{Deserialize, Serialize};

use crate::core::vec3::Vec3;
use crate::game::intent::IntentCommand;
use crate::game::state::{ClientId, CombatState, MotionState};

// =============================================================================
// REPLICATED FIELD WIRE TYPES
// =============================================================================

/// Identifies one replicated field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    /// Display name
    Name,
    /// World position
    Position,
    /// Euler rotation
    Rotation,
    /// Locomotion state
    MotionState,
    /// Combat state
    CombatState,
    /// Health points
    Health,
    /// Punch animation blend
    PunchBlend,
}

/// A committed value of one replicated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldValue {
    /// Display name
    Name {
        /// Value
        value: String,
    },
    /// World position
    Position {
        /// Value
        value: Vec3,
    },
    /// Euler rotation
    Rotation {
        /// Value
        value: Vec3,
    },
    /// Locomotion state
    MotionState {
        /// Value
        value: MotionState,
    },
    /// Combat state
    CombatState {
        /// Value
        value: CombatState,
    },
    /// Health points
    Health {
        /// Value
        value: f32,
    },
    /// Punch animation blend
    PunchBlend {
        /// Value
        value: f32,
    },
}

impl FieldValue {
    /// The field this value belongs to.
    pub fn field_id(&self) -> FieldId {
        match self {
            FieldValue::Name { .. } => FieldId::Name,
            FieldValue::Position { .. } => FieldId::Position,
            FieldValue::Rotation { .. } => FieldId::Rotation,
            FieldValue::MotionState { .. } => FieldId::MotionState,
            FieldValue::CombatState { .. } => FieldId::CombatState,
            FieldValue::Health { .. } => FieldId::Health,
            FieldValue::PunchBlend { .. } => FieldId::PunchBlend,
        }
    }
}

/// One field with its commit version, as carried in snapshots and updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Version of the committed write.
    pub version: u64,
    /// Committed value.
    pub value: FieldValue,
}

/// Full current state of one entity (for spawns and late-join sync).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity identifier (owning connection id).
    pub id: ClientId,
    /// Every replicated field at its current version.
    pub fields: Vec<FieldUpdate>,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// An intent command for the named entity.
    ///
    /// The entity id is carried explicitly so the authority can verify the
    /// sender owns it (damage commands target other entities and are the
    /// exception).
    Intent {
        /// Entity the command addresses.
        entity: ClientId,
        /// The command.
        command: IntentCommand,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },

    /// Client is leaving the session.
    Leave,
}

/// Composite position+rotation delta as a flat struct.
///
/// The tagged message enums only serialize as JSON; this flat form exists
/// for binary transport of the highest-rate message kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionDelta {
    /// World-space movement vector.
    pub position_delta: Vec3,
    /// Euler rotation delta.
    pub rotation_delta: Vec3,
}

impl MotionDelta {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Convert to the intent command form.
    pub fn into_command(self) -> IntentCommand {
        IntentCommand::Motion {
            position_delta: self.position_delta,
            rotation_delta: self.rotation_delta,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message after connecting: assigned id plus a snapshot of the
    /// present world state. Late joiners synchronize from this, not from
    /// replayed history.
    Welcome {
        /// Id assigned to this connection (and its entity).
        client_id: ClientId,
        /// Current player count with its version.
        player_count: CounterUpdate,
        /// Current state of every live entity.
        entities: Vec<EntitySnapshot>,
    },

    /// An entity spawned (a player connected).
    EntitySpawned {
        /// Full initial state.
        snapshot: EntitySnapshot,
    },

    /// An entity despawned (its connection closed).
    EntityDespawned {
        /// Entity that went away.
        id: ClientId,
    },

    /// A replicated field changed.
    FieldChanged {
        /// Entity whose field changed.
        entity: ClientId,
        /// Version of the committed write.
        version: u64,
        /// Committed value.
        value: FieldValue,
    },

    /// The replicated player counter changed.
    PlayerCountChanged {
        /// Version of the committed write.
        version: u64,
        /// Connected player count.
        count: u32,
    },

    /// Point-to-point notification to the damaged entity's own connection,
    /// independent of the broadcast replication of the health field.
    HealthChanged {
        /// Health after the damage was applied.
        health: f32,
        /// Connection that sent the damage command.
        source: ClientId,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms since process start).
        server_time: u64,
    },

    /// Error message.
    Error {
        /// Error code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason string.
        reason: String,
    },
}

/// A versioned scalar update (used for the player counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterUpdate {
    /// Version of the committed write.
    pub version: u64,
    /// Committed count.
    pub count: u32,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed.
    MalformedMessage,
    /// Connection limit reached.
    ServerFull,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
