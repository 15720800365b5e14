//! Decap build scheduler daemon.
//!
//! Wires configuration, storage and the pod cluster into a running scheduler.

pub mod state;
pub mod tasks;

pub use state::AppState;
