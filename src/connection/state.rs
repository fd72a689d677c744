//! Client state

use std::net::SocketAddr;
use std::time::Instant;

/// Unique client identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Create from raw u64
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Why the send path gave up on a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A disconnect-class packet was written
    Disconnect,
    /// The transport failed mid-write
    WriteFailed,
}

/// Client lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Active,
    /// Waiting for the owning server to tear the client down
    PendingTermination(TerminationReason),
}

/// Per-client state
#[derive(Debug)]
pub struct ClientState {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub phase: ClientPhase,
    pub connected_at: Instant,
}

impl ClientState {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            phase: ClientPhase::Active,
            connected_at: Instant::now(),
        }
    }

    /// Flag for termination. The first reason sticks.
    pub fn set_pending_termination(&mut self, reason: TerminationReason) -> bool {
        match self.phase {
            ClientPhase::Active => {
                self.phase = ClientPhase::PendingTermination(reason);
                true
            }
            ClientPhase::PendingTermination(_) => false,
        }
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match self.phase {
            ClientPhase::Active => None,
            ClientPhase::PendingTermination(reason) => Some(reason),
        }
    }

    /// Get connection duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}
