//! # Punch Arena Server
//!
//! Authoritative state replication for a small multiplayer brawler: each
//! client drives its own avatar, a single authority arbitrates every write,
//! and all observers converge on the committed state.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PUNCH ARENA SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Math primitives                           │
//! │  └── vec3.rs     - 3D vector and yaw rotation                │
//! │                                                              │
//! │  game/           - Simulation logic                          │
//! │  ├── state.rs    - Identifiers, states, tuning constants     │
//! │  ├── motion.rs   - Memoryless motion/combat state machine    │
//! │  └── intent.rs   - Owner-side sampling and punch detection   │
//! │                                                              │
//! │  replication/    - Authority-owned state and fan-out         │
//! │  ├── value.rs    - Versioned replicated field                │
//! │  ├── arbiter.rs  - Authority context and command arbitration │
//! │  └── session.rs  - Subscriber hub and observer mirror        │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── relay.rs    - Pre-session relay allocation              │
//! │  └── server.rs   - WebSocket server and authority task       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! Write access to replicated state is a capability, not a runtime check:
//! only the `AuthorityContext` inside the authority task holds the mutable
//! fields, and every inbound command funnels through one event queue, so
//! all writes are serialized by construction. Observers hold `ReplicaView`
//! mirrors with no write API at all.
//!
//! Ownership is per-entity: an avatar's motion comes from its own client's
//! intent commands, while spawn placement, names, punch blends, and health
//! are decided on the authority side.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod replication;

// Re-export commonly used types
pub use crate::core::vec3::Vec3;
pub use game::intent::{IntentChannel, IntentCommand};
pub use game::state::{ClientId, CombatState, MotionState};
pub use network::server::{GameServer, ServerConfig};
pub use replication::arbiter::{AuthorityArbiter, AuthorityContext};
pub use replication::session::ReplicaView;
pub use replication::value::ReplicatedValue;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client input sampling rate (Hz)
pub const TICK_RATE: u32 = 60;
