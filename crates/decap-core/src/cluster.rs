//! Pod cluster trait and build pod types.
//!
//! One build runs as one pod. The scheduler describes pods with [`BuildPodSpec`]
//! and observes them through [`PodObservation`], independent of the concrete
//! cluster API.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;

/// Value of the `type` label carried by every build pod.
pub const BUILD_POD_TYPE: &str = "decap-build";

/// Name of the container that runs the build itself.
pub const BUILD_CONTAINER_NAME: &str = "build-server";

/// Label selector matching all build pods.
pub fn build_pod_selector() -> String {
    format!("type={BUILD_POD_TYPE}")
}

/// Make a string usable as a cluster label value.
///
/// `.` and `/` are replaced with `_`.
pub fn as_label(s: &str) -> String {
    s.replace(['.', '/'], "_")
}

/// Specification for a build pod to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPodSpec {
    /// Pod name; the build ID.
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Build container first, sidecars after.
    pub containers: Vec<ContainerSpec>,
    pub volumes: Vec<VolumeSpec>,
}

impl BuildPodSpec {
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// A container in a build pod.
///
/// Field names follow the cluster's container schema so that sidecar fragments
/// written against that schema deserialize directly. Fields not modelled here are
/// kept in `extra` and passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContainerSpec {
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }
}

/// An environment variable. Sources other than a literal value, such as
/// `valueFrom`, are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            extra: serde_json::Map::new(),
        }
    }
}

/// A volume mount specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Name of the pod volume.
    pub name: String,
    /// Path to mount in the container.
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    /// `subPath`, `mountPropagation` and the like.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl VolumeMount {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            read_only: false,
            extra: serde_json::Map::new(),
        }
    }
}

/// A pod-level volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeSource {
    /// A git repository checked out at `revision`.
    GitRepo { repository: String, revision: String },
    /// A cluster secret projected as files.
    Secret { secret_name: String },
}

/// Observed state of a build pod, as delivered by a watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodObservation {
    pub name: String,
    pub containers: Vec<ContainerObservation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerObservation {
    pub name: String,
    pub terminated: Option<Terminated>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminated {
    /// Empty when the container never actually started.
    pub container_id: Option<String>,
    pub exit_code: i32,
}

impl PodObservation {
    /// True once the build container has run and terminated.
    ///
    /// A terminated status without a container ID means the container was never
    /// scheduled; such pods are left alone.
    pub fn build_finished(&self) -> bool {
        self.containers.iter().any(|c| {
            c.name == BUILD_CONTAINER_NAME
                && c.terminated
                    .as_ref()
                    .and_then(|t| t.container_id.as_deref())
                    .is_some_and(|id| !id.is_empty())
        })
    }
}

/// The cluster that runs build pods.
#[async_trait]
pub trait PodCluster: Send + Sync {
    /// Name of this cluster backend.
    fn name(&self) -> &'static str;

    /// Create a build pod.
    async fn create_pod(&self, spec: BuildPodSpec) -> Result<()>;

    /// Delete a pod by name.
    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// Subscribe to changes of pods matching `label_selector`.
    ///
    /// The stream may end or yield errors; callers resubscribe.
    async fn watch_pods(
        &self,
        label_selector: &str,
    ) -> Result<BoxStream<'static, Result<PodObservation>>>;
}
