//! Relay Allocation
//!
//! External collaborator that hands out relay server allocations before a
//! hosting or joining session begins. Used exactly once per session start;
//! any failure aborts the session start with no retry.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use rand::Rng;
use tracing::info;
use uuid::Uuid;

/// Length of generated join codes.
const JOIN_CODE_LEN: usize = 6;

/// Relay allocation failures. Each one fails the session start.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// The relay service refused or failed the allocation.
    #[error("relay allocation failed: {0}")]
    AllocationFailed(String),

    /// No allocation exists for the presented join code.
    #[error("unknown join code: {0}")]
    UnknownJoinCode(String),
}

/// Data returned when hosting: everything needed to bind the transport and
/// invite clients.
#[derive(Debug, Clone)]
pub struct HostAllocation {
    /// Relay server endpoint.
    pub endpoint: SocketAddr,
    /// Allocation identifier.
    pub allocation_id: Uuid,
    /// Connection secret.
    pub key: Vec<u8>,
    /// Host connection data blob.
    pub connection_data: Vec<u8>,
    /// Code clients present to join this session.
    pub join_code: String,
}

/// Data returned when joining via a code.
#[derive(Debug, Clone)]
pub struct JoinAllocation {
    /// Relay server endpoint.
    pub endpoint: SocketAddr,
    /// Allocation identifier.
    pub allocation_id: Uuid,
    /// Connection secret.
    pub key: Vec<u8>,
    /// Own connection data blob.
    pub connection_data: Vec<u8>,
    /// The host's connection data blob.
    pub host_connection_data: Vec<u8>,
}

/// Relay allocation service.
pub trait RelayAllocator {
    /// Allocate a relay server for up to `max_connections` clients.
    fn allocate(&self, max_connections: usize) -> Result<HostAllocation, RelayError>;

    /// Resolve a join code into connection data.
    fn join(&self, join_code: &str) -> Result<JoinAllocation, RelayError>;
}

/// Host a session: allocate the relay and return the hosting data.
///
/// Call right before starting the server; a `RelayError` here means the
/// hosting attempt is over.
pub fn host_session(
    allocator: &impl RelayAllocator,
    max_connections: usize,
) -> Result<HostAllocation, RelayError> {
    info!("Relay Server starting with max connections {max_connections}");
    let allocation = allocator.allocate(max_connections)?;
    info!("Relay Server generated a join code : {}", allocation.join_code);
    Ok(allocation)
}

/// Join a session by code.
pub fn join_session(
    allocator: &impl RelayAllocator,
    join_code: &str,
) -> Result<JoinAllocation, RelayError> {
    let allocation = allocator.join(join_code)?;
    info!("Client joined game with join code {join_code}");
    Ok(allocation)
}

// =============================================================================
// LOCAL ALLOCATOR
// =============================================================================

/// In-process allocator: every allocation points at one local endpoint.
///
/// Stands in for the cloud relay service in tests and single-host runs.
#[derive(Debug)]
pub struct LocalRelayAllocator {
    endpoint: SocketAddr,
    allocations: Mutex<BTreeMap<String, HostAllocation>>,
}

impl LocalRelayAllocator {
    /// Create an allocator handing out `endpoint`.
    pub fn new(endpoint: SocketAddr) -> Self {
        Self { endpoint, allocations: Mutex::new(BTreeMap::new()) }
    }

    fn random_code() -> String {
        let mut rng = rand::thread_rng();
        (0..JOIN_CODE_LEN)
            .map(|_| {
                // Unambiguous uppercase alphanumerics.
                const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
                ALPHABET[rng.gen_range(0..ALPHABET.len())] as char
            })
            .collect()
    }
}

impl RelayAllocator for LocalRelayAllocator {
    fn allocate(&self, _max_connections: usize) -> Result<HostAllocation, RelayError> {
        let mut rng = rand::thread_rng();
        let allocation = HostAllocation {
            endpoint: self.endpoint,
            allocation_id: Uuid::new_v4(),
            key: (0..32).map(|_| rng.gen()).collect(),
            connection_data: (0..16).map(|_| rng.gen()).collect(),
            join_code: Self::random_code(),
        };

        let mut allocations = self
            .allocations
            .lock()
            .map_err(|_| RelayError::AllocationFailed("allocation table poisoned".into()))?;
        allocations.insert(allocation.join_code.clone(), allocation.clone());
        Ok(allocation)
    }

    fn join(&self, join_code: &str) -> Result<JoinAllocation, RelayError> {
        let allocations = self
            .allocations
            .lock()
            .map_err(|_| RelayError::AllocationFailed("allocation table poisoned".into()))?;

        let host = allocations
            .get(join_code)
            .ok_or_else(|| RelayError::UnknownJoinCode(join_code.to_string()))?;

        let mut rng = rand::thread_rng();
        Ok(JoinAllocation {
            endpoint: host.endpoint,
            allocation_id: host.allocation_id,
            key: host.key.clone(),
            connection_data: (0..16).map(|_| rng.gen()).collect(),
            host_connection_data: host.connection_data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> LocalRelayAllocator {
        LocalRelayAllocator::new("127.0.0.1:9000".parse().unwrap())
    }

    #[test]
    fn test_allocate_then_join_round_trip() {
        let allocator = local();

        let host = host_session(&allocator, 10).unwrap();
        assert_eq!(host.join_code.len(), JOIN_CODE_LEN);

        let join = join_session(&allocator, &host.join_code).unwrap();
        assert_eq!(join.endpoint, host.endpoint);
        assert_eq!(join.allocation_id, host.allocation_id);
        assert_eq!(join.key, host.key);
        assert_eq!(join.host_connection_data, host.connection_data);
    }

    #[test]
    fn test_unknown_join_code_fails_session_start() {
        let allocator = local();
        let result = join_session(&allocator, "NOPE42");
        assert!(matches!(result, Err(RelayError::UnknownJoinCode(_))));
    }

    #[test]
    fn test_allocations_are_distinct() {
        let allocator = local();
        let a = allocator.allocate(10).unwrap();
        let b = allocator.allocate(10).unwrap();
        assert_ne!(a.allocation_id, b.allocation_id);
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_failing_allocator_aborts_hosting() {
        struct Refusing;

        impl RelayAllocator for Refusing {
            fn allocate(&self, _: usize) -> Result<HostAllocation, RelayError> {
                Err(RelayError::AllocationFailed("service unavailable".into()))
            }

            fn join(&self, code: &str) -> Result<JoinAllocation, RelayError> {
                Err(RelayError::UnknownJoinCode(code.to_string()))
            }
        }

        assert!(host_session(&Refusing, 10).is_err());
    }
}
