//! Launch scenarios against in-memory collaborators.

use async_trait::async_trait;
use decap_core::cluster::{BuildPodSpec, PodCluster, PodObservation};
use decap_core::lock::{LockStore, MemoryLockStore};
use decap_core::project::{Project, ProjectDescriptor, StaticProjectCatalog};
use decap_core::{BuildEvent, Error, Result};
use decap_scheduler::{
    BuildOrchestrator, BuildQueueGate, DEFAULT_LOCK_TTL, DistributedLockService,
    InMemoryDeferralQueue, LaunchOutcome, PodTemplate, QueueState,
};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records submitted pods. The first `failures` submissions fail.
#[derive(Default)]
struct RecordingCluster {
    created: Mutex<Vec<BuildPodSpec>>,
    failures: AtomicUsize,
}

impl RecordingCluster {
    fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            ..Default::default()
        }
    }

    fn created(&self) -> Vec<BuildPodSpec> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodCluster for RecordingCluster {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn create_pod(&self, spec: BuildPodSpec) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Internal("api server unavailable".to_string()));
        }
        self.created.lock().unwrap().push(spec);
        Ok(())
    }

    async fn delete_pod(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn watch_pods(
        &self,
        _label_selector: &str,
    ) -> Result<BoxStream<'static, Result<PodObservation>>> {
        Ok(stream::empty().boxed())
    }
}

struct Harness {
    orchestrator: BuildOrchestrator,
    cluster: Arc<RecordingCluster>,
    locks: Arc<MemoryLockStore>,
}

fn harness(cluster: RecordingCluster) -> Harness {
    let project = Project::new(
        "acme",
        "widgets",
        ProjectDescriptor::new("acme/builder:1", Some("feature/.*")).unwrap(),
    );
    let cluster = Arc::new(cluster);
    let locks = Arc::new(MemoryLockStore::new());

    let orchestrator = BuildOrchestrator::new(
        Arc::new(StaticProjectCatalog::new([project])),
        cluster.clone(),
        DistributedLockService::new(locks.clone(), DEFAULT_LOCK_TTL),
        Arc::new(InMemoryDeferralQueue::new()),
        PodTemplate::new("https://github.com/acme/buildscripts", "master"),
    );

    Harness {
        orchestrator,
        cluster,
        locks,
    }
}

fn login_event() -> BuildEvent {
    BuildEvent::new("acme", "widgets", "feature/login")
}

#[tokio::test]
async fn test_launch_builds_pod_for_managed_ref() {
    let h = harness(RecordingCluster::default());

    let outcome = h.orchestrator.launch_build(login_event()).await.unwrap();
    let LaunchOutcome::Launched { build_id } = outcome else {
        panic!("expected launch, got {:?}", outcome);
    };

    let created = h.cluster.created();
    assert_eq!(created.len(), 1);
    let pod = &created[0];
    assert_eq!(pod.name, build_id.to_string());
    assert_eq!(pod.labels["type"], "decap-build");
    assert_eq!(pod.labels["team"], "acme");
    assert_eq!(pod.labels["project"], "widgets");
    assert_eq!(pod.labels["branch"], "feature_login");
    assert_eq!(pod.labels["lockname"], "acme_widgets_feature_login");

    let build = pod.container("build-server").unwrap();
    assert_eq!(build.image.as_deref(), Some("acme/builder:1"));
    assert_eq!(build.env_value("BUILD_ID"), Some(build_id.to_string().as_str()));
    assert_eq!(build.env_value("PROJECT_KEY"), Some("acme/widgets"));
    assert_eq!(build.env_value("BRANCH_TO_BUILD"), Some("feature/login"));
    assert_eq!(
        build.env_value("BUILD_LOCK_KEY"),
        Some("acme/widgets/feature/login")
    );

    assert!(h.locks.get("acme/widgets/feature/login").await.unwrap().is_some());
}

#[tokio::test]
async fn test_second_launch_is_deferred() {
    let h = harness(RecordingCluster::default());

    let first = h.orchestrator.launch_build(login_event()).await.unwrap();
    assert!(first.is_launched());

    let second = h.orchestrator.launch_build(login_event()).await.unwrap();
    assert_eq!(
        second,
        LaunchOutcome::Deferred {
            lock_name: "acme/widgets/feature/login".to_string()
        }
    );
    h.orchestrator.launch_build(login_event()).await.unwrap();

    assert_eq!(h.cluster.created().len(), 1);
    let deferred = h.orchestrator.deferred_builds().await.unwrap();
    assert_eq!(deferred.len(), 1);
    assert!(deferred[0].id.is_some());
    assert!(deferred[0].deferred_at.is_some());
}

#[tokio::test]
async fn test_other_branches_are_not_blocked() {
    let h = harness(RecordingCluster::default());

    h.orchestrator.launch_build(login_event()).await.unwrap();
    let other = BuildEvent::new("acme", "widgets", "feature/signup");
    assert!(h.orchestrator.launch_build(other).await.unwrap().is_launched());
    assert_eq!(h.cluster.created().len(), 2);
}

#[tokio::test]
async fn test_unmanaged_ref_is_rejected() {
    let h = harness(RecordingCluster::default());

    let err = h
        .orchestrator
        .launch_build(BuildEvent::new("acme", "widgets", "master"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RefNotManaged { ref git_ref, .. } if git_ref == "master"));
    assert!(h.cluster.created().is_empty());
    assert!(h.orchestrator.deferred_builds().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_project_is_rejected() {
    let h = harness(RecordingCluster::default());

    let err = h
        .orchestrator
        .launch_build(BuildEvent::new("acme", "gadgets", "feature/login"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ProjectNotFound(ref key) if key == "acme/gadgets"));
    assert!(h.cluster.created().is_empty());
}

#[tokio::test]
async fn test_closed_queue_launches_nothing() {
    let h = harness(RecordingCluster::default());
    h.orchestrator.close_queue();
    assert!(!h.orchestrator.queue_is_open());

    let outcome = h.orchestrator.launch_build(login_event()).await.unwrap();
    assert_eq!(outcome, LaunchOutcome::QueueClosed);
    assert!(h.cluster.created().is_empty());
    assert!(h.locks.get("acme/widgets/feature/login").await.unwrap().is_none());

    h.orchestrator.open_queue();
    assert!(h.orchestrator.launch_build(login_event()).await.unwrap().is_launched());
}

#[tokio::test]
async fn test_gate_can_start_closed() {
    let h = harness(RecordingCluster::default());
    let orchestrator = h
        .orchestrator
        .with_gate(BuildQueueGate::with_state(QueueState::Closed));

    assert!(!orchestrator.queue_is_open());
    assert_eq!(
        orchestrator.launch_build(login_event()).await.unwrap(),
        LaunchOutcome::QueueClosed
    );
}

#[tokio::test]
async fn test_failed_pod_creation_releases_lock() {
    let h = harness(RecordingCluster::failing(1));

    let outcome = h.orchestrator.launch_build(login_event()).await.unwrap();
    assert!(matches!(outcome, LaunchOutcome::Failed { .. }));
    assert!(h.locks.get("acme/widgets/feature/login").await.unwrap().is_none());
    assert!(h.orchestrator.deferred_builds().await.unwrap().is_empty());

    assert!(h.orchestrator.launch_build(login_event()).await.unwrap().is_launched());
    assert_eq!(h.cluster.created().len(), 1);
}

#[tokio::test]
async fn test_relaunch_deferred_after_release() {
    let h = harness(RecordingCluster::default());

    h.orchestrator.launch_build(login_event()).await.unwrap();
    h.orchestrator.launch_build(login_event()).await.unwrap();

    // Still locked: the event goes back on the queue.
    assert_eq!(h.orchestrator.relaunch_deferred().await, 0);
    assert_eq!(h.orchestrator.deferred_builds().await.unwrap().len(), 1);

    h.locks.delete("acme/widgets/feature/login").await.unwrap();
    assert_eq!(h.orchestrator.relaunch_deferred().await, 1);
    assert!(h.orchestrator.deferred_builds().await.unwrap().is_empty());
    assert_eq!(h.cluster.created().len(), 2);
}

#[tokio::test]
async fn test_launch_deferred_runs_per_tick() {
    let h = harness(RecordingCluster::default());

    h.orchestrator.launch_build(login_event()).await.unwrap();
    h.orchestrator.launch_build(login_event()).await.unwrap();
    h.locks.delete("acme/widgets/feature/login").await.unwrap();

    h.orchestrator.launch_deferred(stream::iter([(), ()])).await;

    assert_eq!(h.cluster.created().len(), 2);
    assert!(h.orchestrator.deferred_builds().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_deferred_build() {
    let h = harness(RecordingCluster::default());

    h.orchestrator.launch_build(login_event()).await.unwrap();
    h.orchestrator.launch_build(login_event()).await.unwrap();
    assert_eq!(h.orchestrator.deferred_builds().await.unwrap().len(), 1);

    h.orchestrator
        .clear_deferred_build("acme/widgets/feature/login")
        .await
        .unwrap();
    assert!(h.orchestrator.deferred_builds().await.unwrap().is_empty());
}
