//! Core domain types and traits for the Decap build scheduler.
//!
//! This crate contains:
//! - Build events, lock names and build identifiers
//! - Projects and the project catalog seam
//! - The pod cluster seam and build pod specifications
//! - Lock and deferral storage contracts
//! - A bounded retry helper for network calls

pub mod cluster;
pub mod deferral;
pub mod error;
pub mod event;
pub mod id;
pub mod lock;
pub mod project;
pub mod retry;

pub use error::{Error, Result};
pub use event::BuildEvent;
pub use id::BuildId;
