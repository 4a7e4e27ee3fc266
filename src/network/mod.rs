//! Networking Layer
//!
//! WebSocket transport, wire protocol, and relay allocation.
//!
//! ## Module Structure
//!
//! - `protocol`: client/server message types and serialization
//! - `relay`: pre-session relay allocation and join codes
//! - `server`: accept loop, connection tasks, and the authority task

pub mod protocol;
pub mod relay;
pub mod server;

// Re-export key types
pub use protocol::{ClientMessage, ErrorCode, MotionDelta, ServerMessage};
pub use relay::{HostAllocation, JoinAllocation, LocalRelayAllocator, RelayAllocator, RelayError};
pub use server::{AuthorityEvent, GameServer, GameServerError, ServerConfig};
