//! Replication Core
//!
//! The authority-owned state model and its propagation to observers.
//!
//! ## Module Structure
//!
//! - `value`: versioned single-field primitive (`ReplicatedValue<T>`)
//! - `arbiter`: authority context, per-command arbitration, lifecycle
//! - `session`: per-observer fan-out and the observer-side mirror

pub mod arbiter;
pub mod session;
pub mod value;

// Re-export key types
pub use arbiter::{ArbiterError, AuthorityArbiter, AuthorityContext, PlayerEntity};
pub use session::{EntityMirror, ReplicaView, ReplicationHub, ReplicationSession};
pub use value::ReplicatedValue;
