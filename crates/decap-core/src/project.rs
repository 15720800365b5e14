//! Projects and the project catalog.
//!
//! The catalog itself (assembled from the build-scripts repository) lives outside
//! this workspace; the scheduler only needs to look projects up by key.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// A buildable project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub team: String,
    #[serde(rename = "project")]
    pub name: String,
    pub descriptor: ProjectDescriptor,
    /// Literal container specs in JSON, included verbatim in the build pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<String>,
}

impl Project {
    pub fn new(
        team: impl Into<String>,
        name: impl Into<String>,
        descriptor: ProjectDescriptor,
    ) -> Self {
        Self {
            team: team.into(),
            name: name.into(),
            descriptor,
            sidecars: Vec::new(),
        }
    }

    pub fn with_sidecar(mut self, fragment: impl Into<String>) -> Self {
        self.sidecars.push(fragment.into());
        self
    }

    /// `team/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.team, self.name)
    }
}

/// Build settings for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor", into = "RawDescriptor")]
pub struct ProjectDescriptor {
    /// Container image the project is built in.
    pub image: String,
    managed_ref: Option<Regex>,
}

#[derive(Serialize, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "buildImage")]
    image: String,
    #[serde(
        rename = "managedRefRegex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    managed_ref: Option<String>,
}

impl TryFrom<RawDescriptor> for ProjectDescriptor {
    type Error = Error;

    fn try_from(raw: RawDescriptor) -> Result<Self> {
        ProjectDescriptor::new(raw.image, raw.managed_ref.as_deref())
    }
}

impl From<ProjectDescriptor> for RawDescriptor {
    fn from(descriptor: ProjectDescriptor) -> Self {
        RawDescriptor {
            managed_ref: descriptor.managed_ref_pattern().map(String::from),
            image: descriptor.image,
        }
    }
}

impl ProjectDescriptor {
    /// An empty pattern is the same as no pattern: every ref is managed.
    pub fn new(image: impl Into<String>, managed_ref: Option<&str>) -> Result<Self> {
        let managed_ref = match managed_ref.filter(|p| !p.is_empty()) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                Error::InvalidInput(format!("managed ref pattern {pattern}: {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            image: image.into(),
            managed_ref,
        })
    }

    pub fn managed_ref_pattern(&self) -> Option<&str> {
        self.managed_ref.as_ref().map(Regex::as_str)
    }

    /// Whether a hook on `git_ref` should launch a build. Unanchored match.
    pub fn is_ref_managed(&self, git_ref: &str) -> bool {
        self.managed_ref
            .as_ref()
            .is_none_or(|re| re.is_match(git_ref))
    }
}

/// Read-only lookup of projects by `team/project` key.
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    async fn get(&self, key: &str) -> Option<Project>;
}

/// A catalog fixed at construction, e.g. from daemon configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticProjectCatalog {
    projects: HashMap<String, Project>,
}

impl StaticProjectCatalog {
    pub fn new(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: projects.into_iter().map(|p| (p.key(), p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[async_trait]
impl ProjectCatalog for StaticProjectCatalog {
    async fn get(&self, key: &str) -> Option<Project> {
        self.projects.get(key).cloned()
    }
}
