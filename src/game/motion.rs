//! Motion/Combat State Machine
//!
//! Memoryless transition policy: the current tick's inputs fully determine
//! the next state. There are no transition guards, so any state is reachable
//! from any state and a punch can be interrupted at will. That mirrors the
//! original control scheme; a cooldown/animation-lock variant would need
//! prior-state tracking this policy deliberately omits.

use serde::{Deserialize, Serialize};

use crate::core::vec3::Vec3;
use crate::game::state::{CombatState, MotionState, ROTATION_SPEED, RUN_INPUT, WALK_SPEED};

/// One tick of raw input from the local device layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    /// Forward axis, roughly [-1, 1]. Positive is forward.
    pub forward: f32,
    /// Turn axis, roughly [-1, 1]. Positive is clockwise yaw.
    pub turn: f32,
    /// Sprint modifier held.
    pub sprint: bool,
    /// Punch trigger held.
    pub punch: bool,
}

impl InputSample {
    /// Neutral input (no movement, no actions).
    pub const fn neutral() -> Self {
        Self { forward: 0.0, turn: 0.0, sprint: false, punch: false }
    }
}

/// Outcome of applying one input sample to the state machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    /// Motion state for this tick.
    pub motion: MotionState,
    /// Combat state for this tick.
    pub combat: CombatState,
    /// World-space movement direction, already speed-scaled.
    pub movement: Vec3,
    /// Rotation delta (Euler degrees, yaw only).
    pub rotation: Vec3,
}

/// Apply the transition rule for one tick.
///
/// `heading_yaw` is the entity's current yaw in degrees, used to project the
/// local forward unit vector into world space. `motion`/`combat` are the
/// states from the previous tick; only the punching-in-place rule keeps the
/// prior motion state, and combat is left untouched while punching on the
/// move.
///
/// Priority order, first match wins:
/// 1. punch held and forward axis zero: enter Punching, movement suppressed;
/// 2. forward axis zero: Idle;
/// 3. forward positive, no sprint: Walk at axis-scaled speed;
/// 4. forward positive, sprinting: Run at the fixed run offset;
/// 5. forward negative: ReverseWalk.
pub fn transition(
    input: InputSample,
    heading_yaw: f32,
    motion: MotionState,
    combat: CombatState,
) -> Transition {
    let forward_dir = Vec3::FORWARD.rotated_y(heading_yaw);
    let rotation = Vec3::new(0.0, input.turn * ROTATION_SPEED, 0.0);

    if input.punch && input.forward == 0.0 {
        return Transition {
            motion,
            combat: CombatState::Punching,
            movement: Vec3::ZERO,
            rotation,
        };
    }

    // Punch held while moving: combat state carries over unchanged. Combat
    // drops back to Idle only on a tick where the trigger is released.
    let combat = if input.punch { combat } else { CombatState::Idle };

    let (motion, movement) = if input.forward == 0.0 {
        (MotionState::Idle, Vec3::ZERO)
    } else if input.forward > 0.0 && !input.sprint {
        (MotionState::Walk, forward_dir.scale(input.forward * WALK_SPEED))
    } else if input.forward > 0.0 {
        // Fixed run offset: sprint speed is constant, not axis-scaled.
        (MotionState::Run, forward_dir.scale(RUN_INPUT * WALK_SPEED))
    } else {
        (MotionState::ReverseWalk, forward_dir.scale(input.forward * WALK_SPEED))
    };

    Transition { motion, combat, movement, rotation }
}
