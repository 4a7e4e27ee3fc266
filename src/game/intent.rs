//! Intent Channel
//!
//! Owning-endpoint side of the synchronization core: samples local input,
//! runs the motion/combat state machine, and turns the result into
//! fire-and-forget commands for the authority.
//!
//! Bandwidth discipline follows the original controls: the composite
//! position+rotation delta is edge-triggered (sent only when it differs from
//! the previously sent delta), while the discrete states are re-sent every
//! tick. Commands are never stored or retried; a lost command just delays
//! convergence by one input sample.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::vec3::Vec3;
use crate::game::motion::{transition, InputSample};
use crate::game::state::{ClientId, CombatState, MotionState, MIN_PUNCH_DISTANCE, PUNCH_DAMAGE};

/// A client-originated request describing a desired state change.
///
/// Ephemeral: applied once by the authority, then discarded.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum IntentCommand {
    /// Composite movement delta, bundled so position and rotation arrive in
    /// one message (this layer provides no multi-field atomicity otherwise).
    Motion {
        /// World-space movement vector, speed-scaled.
        position_delta: Vec3,
        /// Euler rotation delta (yaw).
        rotation_delta: Vec3,
    },
    /// Desired motion state for this tick.
    SetMotionState {
        /// New state.
        state: MotionState,
    },
    /// Desired combat state for this tick.
    SetCombatState {
        /// New state.
        state: CombatState,
    },
    /// Apply damage to another entity (punch landed client-side).
    Damage {
        /// Entity hit by the punch.
        target: ClientId,
        /// Damage amount.
        amount: f32,
    },
}

// =============================================================================
// GEOMETRY QUERY (external collaborator)
// =============================================================================

/// External geometry query used for punch hit detection.
///
/// The raycast itself is owned by the engine/physics layer; this core only
/// consumes the nearest intersected entity id.
pub trait GeometryQuery {
    /// Cast a ray and return the nearest entity within `max_distance`, if any.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<ClientId>;
}

/// One hand's transform, as supplied by the presentation layer each tick.
#[derive(Clone, Copy, Debug)]
pub struct HandTransform {
    /// Ray origin (hand position in world space).
    pub origin: Vec3,
    /// Aim direction in world space.
    pub aim: Vec3,
}

// =============================================================================
// INTENT CHANNEL
// =============================================================================

/// Per-owning-endpoint command source.
///
/// Holds the dedup cache for the composite delta and the prior discrete
/// states fed back into the state machine.
#[derive(Debug, Default)]
pub struct IntentChannel {
    last_sent_position: Option<Vec3>,
    last_sent_rotation: Option<Vec3>,
    motion: MotionState,
    combat: CombatState,
}

impl IntentChannel {
    /// Create a channel with Idle/Idle initial states and an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current motion state as last sampled.
    pub fn motion_state(&self) -> MotionState {
        self.motion
    }

    /// Current combat state as last sampled.
    pub fn combat_state(&self) -> CombatState {
        self.combat
    }

    /// Sample one tick of input and emit the commands to send.
    ///
    /// `heading_yaw` is the local entity's current yaw in degrees.
    pub fn sample(&mut self, input: InputSample, heading_yaw: f32) -> Vec<IntentCommand> {
        let t = transition(input, heading_yaw, self.motion, self.combat);
        self.motion = t.motion;
        self.combat = t.combat;

        let mut commands = Vec::with_capacity(3);

        // Edge-triggered: only send the composite delta when it changed.
        let changed = self.last_sent_position != Some(t.movement)
            || self.last_sent_rotation != Some(t.rotation);
        if changed {
            self.last_sent_position = Some(t.movement);
            self.last_sent_rotation = Some(t.rotation);
            commands.push(IntentCommand::Motion {
                position_delta: t.movement,
                rotation_delta: t.rotation,
            });
        }

        // Level-triggered: states go out every tick.
        commands.push(IntentCommand::SetMotionState { state: t.motion });
        commands.push(IntentCommand::SetCombatState { state: t.combat });

        commands
    }

    /// Resolve punch hits against the external geometry query.
    ///
    /// Raycasts from each hand; every hit yields one damage command carrying
    /// the hit entity's id.
    pub fn resolve_punches(
        &self,
        query: &impl GeometryQuery,
        hands: &[HandTransform],
    ) -> Vec<IntentCommand> {
        if self.combat != CombatState::Punching {
            return Vec::new();
        }

        hands
            .iter()
            .filter_map(|hand| {
                let hit = query.raycast(hand.origin, hand.aim, MIN_PUNCH_DISTANCE)?;
                debug!(target_id = hit.0, "punch connected");
                Some(IntentCommand::Damage { target: hit, amount: PUNCH_DAMAGE })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHit;

    impl GeometryQuery for NoHit {
        fn raycast(&self, _: Vec3, _: Vec3, _: f32) -> Option<ClientId> {
            None
        }
    }

    /// Hits a fixed target when the ray starts close enough.
    struct FixedHit {
        target: ClientId,
        within: f32,
    }

    impl GeometryQuery for FixedHit {
        fn raycast(&self, origin: Vec3, _: Vec3, max_distance: f32) -> Option<ClientId> {
            (origin.length() <= self.within && self.within <= max_distance).then_some(self.target)
        }
    }

    fn motion_count(commands: &[IntentCommand]) -> usize {
        commands
            .iter()
            .filter(|c| matches!(c, IntentCommand::Motion { .. }))
            .count()
    }

    #[test]
    fn test_first_sample_sends_motion() {
        let mut channel = IntentChannel::new();
        let commands = channel.sample(InputSample::neutral(), 0.0);
        // Even a neutral first sample populates the cache with one send.
        assert_eq!(motion_count(&commands), 1);
    }

    #[test]
    fn test_unchanged_delta_not_resent() {
        let mut channel = IntentChannel::new();
        let input = InputSample { forward: 1.0, ..InputSample::neutral() };

        let first = channel.sample(input, 0.0);
        assert_eq!(motion_count(&first), 1);

        // Same input, same heading: composite delta is identical.
        let second = channel.sample(input, 0.0);
        assert_eq!(motion_count(&second), 0);
    }

    #[test]
    fn test_changed_delta_resent() {
        let mut channel = IntentChannel::new();
        channel.sample(InputSample { forward: 1.0, ..InputSample::neutral() }, 0.0);
        let commands = channel.sample(InputSample { forward: 0.5, ..InputSample::neutral() }, 0.0);
        assert_eq!(motion_count(&commands), 1);
    }

    #[test]
    fn test_states_resent_every_tick() {
        let mut channel = IntentChannel::new();
        let input = InputSample { forward: 1.0, ..InputSample::neutral() };
        for _ in 0..3 {
            let commands = channel.sample(input, 0.0);
            assert!(commands
                .iter()
                .any(|c| matches!(c, IntentCommand::SetMotionState { state: MotionState::Walk })));
            assert!(commands
                .iter()
                .any(|c| matches!(c, IntentCommand::SetCombatState { .. })));
        }
    }

    #[test]
    fn test_punch_miss_yields_no_damage() {
        let mut channel = IntentChannel::new();
        channel.sample(InputSample { punch: true, ..InputSample::neutral() }, 0.0);

        let hands = [HandTransform { origin: Vec3::ZERO, aim: Vec3::UP }];
        assert!(channel.resolve_punches(&NoHit, &hands).is_empty());
    }

    #[test]
    fn test_punch_hit_yields_damage_command() {
        let mut channel = IntentChannel::new();
        channel.sample(InputSample { punch: true, ..InputSample::neutral() }, 0.0);

        let query = FixedHit { target: ClientId::new(7), within: 0.2 };
        let hands = [
            HandTransform { origin: Vec3::ZERO, aim: Vec3::UP },
            HandTransform { origin: Vec3::new(10.0, 0.0, 0.0), aim: -Vec3::UP },
        ];
        let commands = channel.resolve_punches(&query, &hands);
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            IntentCommand::Damage { target: ClientId::new(7), amount: PUNCH_DAMAGE }
        );
    }

    #[test]
    fn test_no_punch_detection_while_combat_idle() {
        let channel = IntentChannel::new();
        let query = FixedHit { target: ClientId::new(7), within: 0.2 };
        let hands = [HandTransform { origin: Vec3::ZERO, aim: Vec3::UP }];
        assert!(channel.resolve_punches(&query, &hands).is_empty());
    }
}
