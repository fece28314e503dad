/// Accept loop for participants connecting to the coordinator.
pub mod coordinator;

/// Coordinator-side session with a single participant.
pub(crate) mod connection;

/// Node-side coordinator link and proposer retries.
pub mod node;

/// Node-side service for external clients.
pub(crate) mod client;
