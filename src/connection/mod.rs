//! Connection collaborators
//!
//! The transport a send path writes to and the registry it reports to.

mod manager;
mod state;
mod transport;

pub use manager::{ClientRegistry, ConnectionManager};
pub use state::{ClientId, ClientPhase, ClientState, TerminationReason};
pub use transport::Transport;
