//! Kubernetes pod cluster implementation.

use async_trait::async_trait;
use decap_core::cluster::{
    BuildPodSpec, ContainerObservation, PodCluster, PodObservation, Terminated, VolumeSource,
};
use decap_core::retry::RetryPolicy;
use decap_core::{Error, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{
    Container, GitRepoVolumeSource, Pod, PodSpec, SecretVolumeSource, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, PostParams};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use tracing::{debug, info};

/// Kubernetes-backed build pod cluster.
pub struct KubernetesCluster {
    client: Client,
    namespace: String,
    retry: RetryPolicy,
}

impl KubernetesCluster {
    pub async fn new(namespace: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(client, namespace, retry))
    }

    pub fn with_client(client: Client, namespace: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            retry,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// HTTP status carried by an API error, if any.
fn api_status(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// Translate a build pod spec into a Kubernetes pod.
///
/// Containers go through their JSON form so that sidecar fields the scheduler
/// does not model survive unchanged.
pub fn to_pod(spec: &BuildPodSpec, namespace: &str) -> Result<Pod> {
    let containers = spec
        .containers
        .iter()
        .map(|c| {
            serde_json::to_value(c)
                .and_then(serde_json::from_value::<Container>)
                .map_err(|e| Error::InvalidInput(format!("container {}: {}", c.name, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let volumes = spec
        .volumes
        .iter()
        .map(|v| match &v.source {
            VolumeSource::GitRepo {
                repository,
                revision,
            } => Volume {
                name: v.name.clone(),
                git_repo: Some(GitRepoVolumeSource {
                    repository: repository.clone(),
                    revision: Some(revision.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            VolumeSource::Secret { secret_name } => Volume {
                name: v.name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        })
        .collect();

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Reduce a watched pod to what the reaper needs.
pub fn observe(pod: &Pod) -> PodObservation {
    let containers = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| ContainerObservation {
                    name: cs.name.clone(),
                    terminated: cs
                        .state
                        .as_ref()
                        .and_then(|s| s.terminated.as_ref())
                        .map(|t| Terminated {
                            container_id: t.container_id.clone(),
                            exit_code: t.exit_code,
                        }),
                })
                .collect()
        })
        .unwrap_or_default();

    PodObservation {
        name: pod.metadata.name.clone().unwrap_or_default(),
        containers,
    }
}

#[async_trait]
impl PodCluster for KubernetesCluster {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create_pod(&self, spec: BuildPodSpec) -> Result<()> {
        let pod = &to_pod(&spec, &self.namespace)?;
        let pods = &self.pods();
        let name = spec.name.as_str();

        info!(pod = %name, namespace = %self.namespace, "Creating build pod");
        self.retry
            .try_run(|| async move {
                match pods.create(&PostParams::default(), pod).await {
                    Ok(_) => Ok(()),
                    // Pod names are build IDs; a conflict is our own earlier attempt.
                    Err(e) if api_status(&e) == Some(409) => {
                        debug!(pod = %name, "Pod already exists");
                        Ok(())
                    }
                    Err(e) => Err(Error::PodCreationFailed(format!("{}: {}", name, e))),
                }
            })
            .await?;
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let pods = &self.pods();

        self.retry
            .try_run(|| async move {
                match pods.delete(name, &DeleteParams::default()).await {
                    Ok(_) => Ok(()),
                    Err(e) if api_status(&e) == Some(404) => {
                        debug!(pod = %name, "Pod already gone");
                        Ok(())
                    }
                    Err(e) => Err(Error::PodDeletionFailed(format!("{}: {}", name, e))),
                }
            })
            .await?;
        Ok(())
    }

    async fn watch_pods(
        &self,
        label_selector: &str,
    ) -> Result<BoxStream<'static, Result<PodObservation>>> {
        let config = watcher::Config::default().labels(label_selector);
        let stream = watcher(self.pods(), config)
            .applied_objects()
            .map(|item| {
                item.map(|pod| observe(&pod))
                    .map_err(|e| Error::WatchStream(e.to_string()))
            })
            .boxed();
        Ok(stream)
    }
}
