//! Player State Definitions
//!
//! Identifiers, discrete animation states, and the tuning constants that
//! drive movement and combat.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// TUNING CONSTANTS
// =============================================================================

/// Base movement speed (units per second of forward input).
pub const WALK_SPEED: f32 = 2.5;

/// Rotation speed multiplier applied to the turn axis.
pub const ROTATION_SPEED: f32 = 1.2;

/// Fixed forward input substituted while sprinting.
///
/// Sprinting does not scale the raw axis; it replaces it with this offset,
/// so run speed is constant regardless of how far the stick is pushed.
pub const RUN_INPUT: f32 = 2.0;

/// Health assigned to every entity at spawn.
pub const DEFAULT_HEALTH: f32 = 1000.0;

/// Entities spawn at a random point on the XZ plane within this range.
pub const SPAWN_RANGE: (f32, f32) = (-4.0, 4.0);

/// Maximum raycast distance for a punch to connect.
pub const MIN_PUNCH_DISTANCE: f32 = 0.25;

/// Damage applied per landed punch.
pub const PUNCH_DAMAGE: f32 = 1.0;

// =============================================================================
// CLIENT ID
// =============================================================================

/// Unique connection identifier, doubling as the entity identifier.
///
/// An entity is owned by exactly one connection; the ids are the same value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Create from a raw connection id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// DISCRETE STATES
// =============================================================================

/// Locomotion state, mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    /// Standing still
    #[default]
    Idle,
    /// Moving forward at axis-scaled speed
    Walk,
    /// Sprinting forward at the fixed run offset
    Run,
    /// Moving backward
    ReverseWalk,
}

/// Combat state, orthogonal to motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatState {
    /// Not fighting
    #[default]
    Idle,
    /// Punch animation active
    Punching,
}
