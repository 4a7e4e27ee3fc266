//! Game Logic Module
//!
//! Simulation-side logic shared by owning endpoints and the authority.
//!
//! ## Module Structure
//!
//! - `state`: identifiers, discrete states, tuning constants
//! - `motion`: memoryless motion/combat state machine
//! - `intent`: owning-endpoint command sampling and punch detection

pub mod intent;
pub mod motion;
pub mod state;

// Re-export key types
pub use intent::{GeometryQuery, HandTransform, IntentChannel, IntentCommand};
pub use motion::{transition, InputSample, Transition};
pub use state::{ClientId, CombatState, MotionState};
