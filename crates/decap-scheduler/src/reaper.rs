//! Reaper that deletes build pods once their build container has exited.

use decap_core::cluster::{PodCluster, PodObservation, build_pod_selector};
use futures::StreamExt;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Watches build pods and deletes each one once, after its build has run.
///
/// A pod name is only recorded as reaped after a successful delete, so a delete
/// that fails is attempted again on the next terminal event for that pod.
pub struct PodReaper {
    cluster: Arc<dyn PodCluster>,
    selector: String,
    reconnect_delay: Duration,
    reaped: HashSet<String>,
}

impl PodReaper {
    pub fn new(cluster: Arc<dyn PodCluster>) -> Self {
        Self {
            cluster,
            selector: build_pod_selector(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reaped: HashSet::new(),
        }
    }

    /// Pause between a dropped watch and the next subscription.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Whether `name` has already been deleted by this reaper.
    pub fn has_reaped(&self, name: &str) -> bool {
        self.reaped.contains(name)
    }

    /// React to one observed pod. Returns true if the pod was deleted now.
    pub async fn handle(&mut self, pod: &PodObservation) -> bool {
        if !pod.build_finished() || self.reaped.contains(&pod.name) {
            return false;
        }

        match self.cluster.delete_pod(&pod.name).await {
            Ok(()) => {
                info!(pod = %pod.name, "Deleted build pod");
                self.reaped.insert(pod.name.clone());
                true
            }
            Err(e) => {
                warn!(pod = %pod.name, error = %e, "Error deleting build pod");
                false
            }
        }
    }

    /// Run until `shutdown` completes, resubscribing whenever the watch drops.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        info!(cluster = self.cluster.name(), selector = %self.selector, "Starting pod reaper");
        tokio::select! {
            _ = shutdown => info!("Pod reaper stopped"),
            _ = self.watch_forever() => {}
        }
    }

    async fn watch_forever(&mut self) {
        loop {
            match self.cluster.watch_pods(&self.selector).await {
                Ok(mut events) => {
                    debug!("Watching build pods");
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(pod) => {
                                self.handle(&pod).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "Pod watch failed, reconnecting");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Error watching cluster"),
            }
            sleep(self.reconnect_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use decap_core::cluster::{
        BUILD_CONTAINER_NAME, BuildPodSpec, ContainerObservation, Terminated,
    };
    use decap_core::{Error, Result};
    use futures::stream::{self, BoxStream};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted watch sessions and records delete calls.
    #[derive(Default)]
    struct ScriptedCluster {
        sessions: Mutex<VecDeque<Vec<Result<PodObservation>>>>,
        deletes: Mutex<Vec<String>>,
        failing_deletes: Mutex<HashSet<String>>,
    }

    impl ScriptedCluster {
        fn with_sessions(sessions: Vec<Vec<Result<PodObservation>>>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
                ..Default::default()
            }
        }

        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PodCluster for ScriptedCluster {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn create_pod(&self, _spec: BuildPodSpec) -> Result<()> {
            unimplemented!()
        }

        async fn delete_pod(&self, name: &str) -> Result<()> {
            self.deletes.lock().unwrap().push(name.to_string());
            if self.failing_deletes.lock().unwrap().remove(name) {
                return Err(Error::PodDeletionFailed(name.to_string()));
            }
            Ok(())
        }

        async fn watch_pods(
            &self,
            label_selector: &str,
        ) -> Result<BoxStream<'static, Result<PodObservation>>> {
            assert_eq!(label_selector, "type=decap-build");
            match self.sessions.lock().unwrap().pop_front() {
                Some(events) => Ok(stream::iter(events).boxed()),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn finished(name: &str) -> PodObservation {
        pod(name, Some("containerd://1234"))
    }

    fn pod(name: &str, container_id: Option<&str>) -> PodObservation {
        PodObservation {
            name: name.to_string(),
            containers: vec![ContainerObservation {
                name: BUILD_CONTAINER_NAME.to_string(),
                terminated: Some(Terminated {
                    container_id: container_id.map(String::from),
                    exit_code: 0,
                }),
            }],
        }
    }

    #[tokio::test]
    async fn test_repeated_terminal_events_delete_once() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut reaper = PodReaper::new(cluster.clone());

        assert!(reaper.handle(&finished("build-1")).await);
        assert!(!reaper.handle(&finished("build-1")).await);
        assert!(reaper.has_reaped("build-1"));
        assert_eq!(cluster.deletes(), vec!["build-1"]);
    }

    #[tokio::test]
    async fn test_unscheduled_pods_are_left_alone() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut reaper = PodReaper::new(cluster.clone());

        assert!(!reaper.handle(&pod("build-1", None)).await);
        assert!(!reaper.handle(&pod("build-1", Some(""))).await);
        assert!(cluster.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_is_retried_on_next_event() {
        let cluster = Arc::new(ScriptedCluster::default());
        cluster
            .failing_deletes
            .lock()
            .unwrap()
            .insert("build-1".to_string());
        let mut reaper = PodReaper::new(cluster.clone());

        assert!(!reaper.handle(&finished("build-1")).await);
        assert!(!reaper.has_reaped("build-1"));
        assert!(reaper.handle(&finished("build-1")).await);
        assert!(!reaper.handle(&finished("build-1")).await);
        assert_eq!(cluster.deletes(), vec!["build-1", "build-1"]);
    }

    #[tokio::test]
    async fn test_run_reconnects_after_stream_error() {
        let cluster = Arc::new(ScriptedCluster::with_sessions(vec![
            vec![
                Ok(finished("build-1")),
                Ok(finished("build-1")),
                Err(Error::WatchStream("connection reset".to_string())),
                Ok(finished("never-seen")),
            ],
            vec![Ok(finished("build-1")), Ok(finished("build-2"))],
        ]));
        let reaper = PodReaper::new(cluster.clone()).with_reconnect_delay(Duration::from_millis(1));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(reaper.run(async {
            let _ = stop_rx.await;
        }));

        for _ in 0..200 {
            if cluster.deletes().len() >= 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        let _ = stop_tx.send(());
        handle.await.unwrap();

        assert_eq!(cluster.deletes(), vec!["build-1", "build-2"]);
    }
}
