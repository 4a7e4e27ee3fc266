//! Core primitives shared by the game and replication layers.

pub mod vec3;

// Re-export core types
pub use vec3::Vec3;
