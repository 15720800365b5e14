//! Build pod assembly.

use decap_core::cluster::{
    BUILD_CONTAINER_NAME, BUILD_POD_TYPE, BuildPodSpec, ContainerSpec, EnvVar, VolumeMount,
    VolumeSource, VolumeSpec, as_label,
};
use decap_core::project::Project;
use decap_core::{BuildEvent, BuildId};
use std::collections::BTreeMap;
use tracing::warn;

pub const BUILD_SCRIPTS_VOLUME: &str = "build-scripts";
pub const BUILD_SCRIPTS_MOUNT_PATH: &str = "/home/decap/buildscripts";
pub const CREDENTIALS_VOLUME: &str = "decap-credentials";
pub const CREDENTIALS_MOUNT_PATH: &str = "/etc/secrets";

/// Settings shared by every build pod.
#[derive(Debug, Clone)]
pub struct PodTemplate {
    /// Git repository with the build scripts, mounted into the build container.
    pub scripts_repository: String,
    pub scripts_branch: String,
    /// Secret mounted as credentials.
    pub credentials_secret: String,
}

impl PodTemplate {
    pub fn new(scripts_repository: impl Into<String>, scripts_branch: impl Into<String>) -> Self {
        Self {
            scripts_repository: scripts_repository.into(),
            scripts_branch: scripts_branch.into(),
            credentials_secret: CREDENTIALS_VOLUME.to_string(),
        }
    }

    pub fn with_credentials_secret(mut self, secret: impl Into<String>) -> Self {
        self.credentials_secret = secret.into();
        self
    }

    /// Assemble the pod for one launched build: the build container first,
    /// then the project's sidecars.
    pub fn build_pod(&self, event: &BuildEvent, build_id: BuildId, project: &Project) -> BuildPodSpec {
        let mut containers = vec![self.base_container(event, build_id, project)];
        containers.extend(sidecars(project));

        BuildPodSpec {
            name: build_id.to_string(),
            labels: labels(event),
            containers,
            volumes: vec![
                VolumeSpec {
                    name: BUILD_SCRIPTS_VOLUME.to_string(),
                    source: VolumeSource::GitRepo {
                        repository: self.scripts_repository.clone(),
                        revision: self.scripts_branch.clone(),
                    },
                },
                VolumeSpec {
                    name: CREDENTIALS_VOLUME.to_string(),
                    source: VolumeSource::Secret {
                        secret_name: self.credentials_secret.clone(),
                    },
                },
            ],
        }
    }

    fn base_container(&self, event: &BuildEvent, build_id: BuildId, project: &Project) -> ContainerSpec {
        ContainerSpec {
            name: BUILD_CONTAINER_NAME.to_string(),
            image: Some(project.descriptor.image.clone()),
            env: vec![
                EnvVar::new("BUILD_ID", build_id.to_string()),
                EnvVar::new("PROJECT_KEY", event.project_key()),
                EnvVar::new("BRANCH_TO_BUILD", event.git_ref.clone()),
                EnvVar::new("BUILD_LOCK_KEY", event.lock_name()),
            ],
            volume_mounts: vec![
                VolumeMount::new(BUILD_SCRIPTS_VOLUME, BUILD_SCRIPTS_MOUNT_PATH),
                VolumeMount::new(CREDENTIALS_VOLUME, CREDENTIALS_MOUNT_PATH),
            ],
            extra: Default::default(),
        }
    }
}

/// Cluster labels identifying a build pod. Values are label-sanitized.
pub fn labels(event: &BuildEvent) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("type".to_string(), BUILD_POD_TYPE.to_string()),
        ("team".to_string(), as_label(&event.team)),
        ("project".to_string(), as_label(&event.project)),
        ("branch".to_string(), as_label(&event.git_ref)),
        ("lockname".to_string(), as_label(&event.lock_name())),
    ])
}

/// Sidecar containers from the project's fragments. Fragments that do not
/// parse, or that would shadow the build container, are skipped.
fn sidecars(project: &Project) -> Vec<ContainerSpec> {
    project
        .sidecars
        .iter()
        .filter_map(|fragment| match serde_json::from_str::<ContainerSpec>(fragment) {
            Ok(c) if c.name == BUILD_CONTAINER_NAME => {
                warn!(project = %project.key(), "Sidecar reuses the build container name, skipping");
                None
            }
            Ok(c) => Some(c),
            Err(e) => {
                warn!(project = %project.key(), error = %e, "Invalid sidecar spec, skipping");
                None
            }
        })
        .collect()
}
