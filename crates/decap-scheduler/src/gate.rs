//! Build queue admission gate.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Whether the build queue admits new launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Open,
    Closed,
}

/// Process-wide Open/Closed switch consulted before every launch.
///
/// The watch sender is the single owner of the value: writers publish a whole
/// new state, readers always see the last completed write. Neither side waits
/// on the other. Not persisted; a new gate starts open.
#[derive(Debug)]
pub struct BuildQueueGate {
    state: watch::Sender<QueueState>,
}

impl BuildQueueGate {
    pub fn new() -> Self {
        Self::with_state(QueueState::Open)
    }

    pub fn with_state(state: QueueState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { state: tx }
    }

    pub fn open(&self) {
        if self.state.send_replace(QueueState::Open) != QueueState::Open {
            info!("Build queue is open");
        }
    }

    pub fn close(&self) {
        if self.state.send_replace(QueueState::Closed) != QueueState::Closed {
            info!("Build queue is closed");
        }
    }

    pub fn state(&self) -> QueueState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == QueueState::Open
    }
}

impl Default for BuildQueueGate {
    fn default() -> Self {
        Self::new()
    }
}
