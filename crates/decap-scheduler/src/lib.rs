//! Build scheduling for Decap.
//!
//! Admits build events, serializes builds per branch with distributed locks,
//! queues contended builds for later, and reaps finished build pods.

pub mod deferral;
pub mod gate;
pub mod lock;
pub mod orchestrator;
pub mod pod;
pub mod reaper;

pub use deferral::InMemoryDeferralQueue;
pub use gate::{BuildQueueGate, QueueState};
pub use lock::{DEFAULT_LOCK_TTL, DistributedLockService};
pub use orchestrator::{BuildOrchestrator, LaunchOutcome};
pub use pod::PodTemplate;
pub use reaper::PodReaper;
