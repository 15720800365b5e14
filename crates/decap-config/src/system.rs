//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use decap_core::cluster::ContainerSpec;
use decap_core::project::{Project, ProjectDescriptor};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "decap";
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3 * 60 * 60);
const DEFAULT_DEFERRAL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CREDENTIALS_SECRET: &str = "decap-credentials";

/// Daemon-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Namespace build pods are created in.
    pub namespace: String,
    /// How long an unreleased build lock stays valid.
    pub lock_ttl: Duration,
    /// How often deferred builds are resubmitted.
    pub deferral_interval: Duration,
    pub lock_store: StoreBackend,
    pub deferral_store: StoreBackend,
    /// Required when either store is Postgres.
    pub database_url: Option<String>,
    /// Retry settings for cluster API calls.
    pub retry: RetryConfig,
    pub build_scripts: BuildScriptsConfig,
    /// Secret mounted into build containers as credentials.
    pub credentials_secret: String,
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub timeout: Option<Duration>,
    pub max_attempts: u32,
}

/// Git repository holding the build scripts, mounted into every build pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildScriptsConfig {
    pub repository: String,
    pub branch: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(10)),
            max_attempts: 3,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
            deferral_interval: DEFAULT_DEFERRAL_INTERVAL,
            lock_store: StoreBackend::Memory,
            deferral_store: StoreBackend::Memory,
            database_url: None,
            retry: RetryConfig::default(),
            build_scripts: BuildScriptsConfig {
                repository: String::new(),
                branch: "master".to_string(),
            },
            credentials_secret: DEFAULT_CREDENTIALS_SECRET.to_string(),
            projects: Vec::new(),
        }
    }
}

/// Read and parse a configuration file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen_projects = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "namespace" => {
                config.namespace = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("namespace".to_string()))?;
            }
            "lock-ttl-secs" => {
                config.lock_ttl = Duration::from_secs(get_positive_arg(node, "lock-ttl-secs")?);
            }
            "deferral-interval-secs" => {
                config.deferral_interval =
                    Duration::from_secs(get_positive_arg(node, "deferral-interval-secs")?);
            }
            "lock-store" => {
                config.lock_store = parse_backend(node, "lock-store")?;
            }
            "deferral-store" => {
                config.deferral_store = parse_backend(node, "deferral-store")?;
            }
            "database-url" => {
                config.database_url = get_first_string_arg(node);
            }
            "retry" => {
                config.retry = parse_retry(node)?;
            }
            "build-scripts" => {
                let repository = get_string_prop(node, "repository").ok_or_else(|| {
                    ConfigError::MissingField("build-scripts repository".to_string())
                })?;
                config.build_scripts = BuildScriptsConfig {
                    repository,
                    branch: get_string_prop(node, "branch").unwrap_or_else(|| "master".to_string()),
                };
            }
            "credentials" => {
                if let Some(secret) = get_string_prop(node, "secret") {
                    config.credentials_secret = secret;
                }
            }
            "project" => {
                let project = parse_project(node)?;
                if !seen_projects.insert(project.key()) {
                    return Err(ConfigError::Duplicate(format!("project {}", project.key())));
                }
                config.projects.push(project);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let needs_database = config.lock_store == StoreBackend::Postgres
        || config.deferral_store == StoreBackend::Postgres;
    if needs_database && config.database_url.is_none() {
        return Err(ConfigError::MissingField("database-url".to_string()));
    }

    Ok(config)
}

fn parse_backend(node: &KdlNode, field: &str) -> ConfigResult<StoreBackend> {
    let value = get_first_string_arg(node).unwrap_or_default();
    match value.as_str() {
        "memory" => Ok(StoreBackend::Memory),
        "postgres" => Ok(StoreBackend::Postgres),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("unknown store backend: {}", value),
        }),
    }
}

fn parse_retry(node: &KdlNode) -> ConfigResult<RetryConfig> {
    let defaults = RetryConfig::default();

    let timeout = match get_integer_prop(node, "timeout-ms") {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(to_u64(ms, "retry timeout-ms")?)),
        None => defaults.timeout,
    };

    let max_attempts = match get_integer_prop(node, "max-attempts") {
        Some(n) => u32::try_from(n)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "retry max-attempts".to_string(),
                message: format!("must be at least 1, got {}", n),
            })?,
        None => defaults.max_attempts,
    };

    Ok(RetryConfig {
        timeout,
        max_attempts,
    })
}

fn parse_project(node: &KdlNode) -> ConfigResult<Project> {
    let key = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("project key".to_string()))?;

    let (team, name) = match key.split_once('/') {
        Some((team, name)) if !team.is_empty() && !name.is_empty() && !name.contains('/') => {
            (team.to_string(), name.to_string())
        }
        _ => {
            return Err(ConfigError::InvalidValue {
                field: "project key".to_string(),
                message: format!("expected team/project, got {}", key),
            });
        }
    };

    let image = get_string_prop(node, "image")
        .ok_or_else(|| ConfigError::MissingField(format!("image for project '{}'", key)))?;
    let managed_ref = get_string_prop(node, "managed-ref");

    let descriptor = ProjectDescriptor::new(image, managed_ref.as_deref()).map_err(|e| {
        ConfigError::InvalidValue {
            field: format!("managed-ref for project '{}'", key),
            message: e.to_string(),
        }
    })?;

    let mut project = Project::new(team, name, descriptor);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "sidecar" {
                let fragment = get_first_string_arg(child).ok_or_else(|| {
                    ConfigError::MissingField(format!("sidecar spec for project '{}'", key))
                })?;
                serde_json::from_str::<ContainerSpec>(&fragment).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: format!("sidecar for project '{}'", key),
                        message: e.to_string(),
                    }
                })?;
                project = project.with_sidecar(fragment);
            }
        }
    }

    Ok(project)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_integer_prop(node: &KdlNode, name: &str) -> Option<i128> {
    node.get(name).and_then(|v| v.as_integer())
}

fn get_positive_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = get_first_integer_arg(node)
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    match to_u64(value, field)? {
        0 => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be positive".to_string(),
        }),
        n => Ok(n),
    }
}

fn to_u64(value: i128, field: &str) -> ConfigResult<u64> {
    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("out of range: {}", value),
    })
}
