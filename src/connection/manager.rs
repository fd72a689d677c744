//! Client registry
//!
//! Tracks connected clients and their termination flags.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::state::{ClientId, ClientState, TerminationReason};
use crate::metrics::METRICS;

/// The part of a client registry the send path depends on
pub trait ClientRegistry: Send + Sync + 'static {
    /// Flag a client so its owner tears it down
    fn mark_pending_termination(&self, client: ClientId, reason: TerminationReason);
}

/// Manages all connected clients
pub struct ConnectionManager {
    clients: DashMap<ClientId, ClientState>,
    /// ID generator
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a new client
    pub fn register(&self, addr: SocketAddr) -> ClientId {
        let id = ClientId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.clients.insert(id, ClientState::new(id, addr));

        METRICS.connection_opened();
        info!(client_id = %id, %addr, "Client connected");
        id
    }

    /// Unregister a client
    pub fn unregister(&self, id: ClientId) {
        if let Some((_, state)) = self.clients.remove(&id) {
            METRICS.connection_closed();
            info!(
                client_id = %id,
                addr = %state.addr,
                duration_secs = state.duration().as_secs_f64(),
                reason = ?state.termination_reason(),
                "Client disconnected"
            );
        }
    }

    pub fn is_pending_termination(&self, id: ClientId) -> bool {
        self.termination_reason(id).is_some()
    }

    pub fn termination_reason(&self, id: ClientId) -> Option<TerminationReason> {
        self.clients.get(&id)?.termination_reason()
    }

    /// Clients waiting to be torn down
    pub fn pending_termination(&self) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|entry| entry.termination_reason().is_some())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Get current client count
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }
}

impl ClientRegistry for ConnectionManager {
    fn mark_pending_termination(&self, client: ClientId, reason: TerminationReason) {
        if let Some(mut state) = self.clients.get_mut(&client) {
            if state.set_pending_termination(reason) {
                debug!(client_id = %client, ?reason, "Client pending termination");
            }
        }
    }
}
