//! Build orchestrator - admits, locks, defers and launches builds.

use decap_core::cluster::{BuildPodSpec, PodCluster};
use decap_core::deferral::DeferralStore;
use decap_core::project::ProjectCatalog;
use decap_core::{BuildEvent, BuildId, Error, Result};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::gate::BuildQueueGate;
use crate::lock::DistributedLockService;
use crate::pod::PodTemplate;

/// What happened to a launch request that passed its preconditions.
///
/// None of these are errors to the caller: a closed queue is an operational
/// pause, a deferral will be retried, and a failed launch has already been
/// logged and its lock released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A build pod was submitted.
    Launched { build_id: BuildId },
    /// The branch is locked by another build; the event was queued.
    Deferred { lock_name: String },
    /// The build queue is closed; nothing was done.
    QueueClosed,
    /// The build could not be started or queued.
    Failed { build_id: BuildId, reason: String },
}

impl LaunchOutcome {
    pub fn is_launched(&self) -> bool {
        matches!(self, LaunchOutcome::Launched { .. })
    }
}

/// Launches builds on the pod cluster, one per branch at a time.
pub struct BuildOrchestrator {
    gate: BuildQueueGate,
    catalog: Arc<dyn ProjectCatalog>,
    cluster: Arc<dyn PodCluster>,
    locks: DistributedLockService,
    deferrals: Arc<dyn DeferralStore>,
    template: PodTemplate,
}

impl BuildOrchestrator {
    pub fn new(
        catalog: Arc<dyn ProjectCatalog>,
        cluster: Arc<dyn PodCluster>,
        locks: DistributedLockService,
        deferrals: Arc<dyn DeferralStore>,
        template: PodTemplate,
    ) -> Self {
        Self {
            gate: BuildQueueGate::new(),
            catalog,
            cluster,
            locks,
            deferrals,
            template,
        }
    }

    /// Use an existing gate, e.g. one that starts closed.
    pub fn with_gate(mut self, gate: BuildQueueGate) -> Self {
        self.gate = gate;
        self
    }

    /// The cluster builds are launched on.
    pub fn cluster(&self) -> Arc<dyn PodCluster> {
        self.cluster.clone()
    }

    /// Launch a build for `event`.
    ///
    /// Returns an error only when the project is unknown or the ref is not
    /// managed by it. Lock contention defers the event and reports success.
    pub async fn launch_build(&self, mut event: BuildEvent) -> Result<LaunchOutcome> {
        if !self.gate.is_open() {
            info!(lock_name = %event.lock_name(), "Build queue closed, not launching");
            return Ok(LaunchOutcome::QueueClosed);
        }

        let project_key = event.project_key();
        let project = self
            .catalog
            .get(&project_key)
            .await
            .ok_or_else(|| Error::ProjectNotFound(project_key.clone()))?;

        if !project.descriptor.is_ref_managed(&event.git_ref) {
            return Err(Error::RefNotManaged {
                project: project_key,
                git_ref: event.git_ref,
            });
        }

        let build_id = BuildId::new();
        event.id = Some(build_id);
        let lock_name = event.lock_name();

        if let Err(e) = self.locks.acquire(&event).await {
            match &e {
                Error::LockHeld(_) => {
                    info!(build_id = %build_id, lock_name = %lock_name, "Lock held, deferring build")
                }
                _ => {
                    warn!(build_id = %build_id, lock_name = %lock_name, error = %e, "Failed to acquire lock, deferring build")
                }
            }
            return Ok(match self.deferrals.defer(event).await {
                Ok(()) => {
                    info!(lock_name = %lock_name, "Deferred build");
                    LaunchOutcome::Deferred { lock_name }
                }
                Err(defer_err) => {
                    error!(lock_name = %lock_name, error = %defer_err, "Failed to defer build");
                    LaunchOutcome::Failed {
                        build_id,
                        reason: defer_err.to_string(),
                    }
                }
            });
        }

        info!(build_id = %build_id, lock_name = %lock_name, "Acquired lock on build");

        let pod = self.template.build_pod(&event, build_id, &project);
        if let Err(e) = self.cluster.create_pod(pod).await {
            let e = match e {
                Error::PodCreationFailed(_) => e,
                other => Error::PodCreationFailed(other.to_string()),
            };
            error!(build_id = %build_id, lock_name = %lock_name, error = %e, "Build not started");
            if let Err(release_err) = self.locks.release(&event).await {
                // The lock expires on its own after the TTL.
                warn!(
                    build_id = %build_id,
                    lock_name = %lock_name,
                    error = %release_err,
                    "Failed to release lock"
                );
            }
            return Ok(LaunchOutcome::Failed {
                build_id,
                reason: e.to_string(),
            });
        }

        info!(build_id = %build_id, lock_name = %lock_name, "Created build pod");
        Ok(LaunchOutcome::Launched { build_id })
    }

    /// Resubmit every deferred build once. Returns how many were launched.
    pub async fn relaunch_deferred(&self) -> usize {
        let deferred = match self.deferrals.poll().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Error retrieving deferred builds");
                return 0;
            }
        };

        let mut launched = 0;
        for event in deferred {
            let lock_name = event.lock_name();
            match self.launch_build(event).await {
                Ok(outcome) if outcome.is_launched() => {
                    info!(lock_name = %lock_name, "Launched deferred build");
                    launched += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(lock_name = %lock_name, error = %e, "Error launching deferred build")
                }
            }
        }
        launched
    }

    /// Relaunch deferred builds on every tick until the tick source ends.
    pub async fn launch_deferred<T>(&self, ticks: impl Stream<Item = T>) {
        futures::pin_mut!(ticks);
        while ticks.next().await.is_some() {
            self.relaunch_deferred().await;
        }
    }

    pub async fn create_pod(&self, spec: BuildPodSpec) -> Result<()> {
        self.cluster.create_pod(spec).await
    }

    pub async fn delete_pod(&self, name: &str) -> Result<()> {
        self.cluster.delete_pod(name).await
    }

    pub async fn defer_build(&self, event: BuildEvent) -> Result<()> {
        self.deferrals.defer(event).await
    }

    /// Deferred builds in the order they were first deferred.
    pub async fn deferred_builds(&self) -> Result<Vec<BuildEvent>> {
        self.deferrals.list().await
    }

    /// Drop the deferred build queued under `lock_name`.
    pub async fn clear_deferred_build(&self, lock_name: &str) -> Result<()> {
        self.deferrals.remove(lock_name).await
    }

    pub fn open_queue(&self) {
        self.gate.open();
    }

    pub fn close_queue(&self) {
        self.gate.close();
    }

    pub fn queue_is_open(&self) -> bool {
        self.gate.is_open()
    }
}
