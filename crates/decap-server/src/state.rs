//! Application state.

use anyhow::Context;
use decap_config::{StoreBackend, SystemConfig};
use decap_core::cluster::PodCluster;
use decap_core::deferral::DeferralStore;
use decap_core::lock::{LockStore, MemoryLockStore};
use decap_core::project::StaticProjectCatalog;
use decap_core::retry::RetryPolicy;
use decap_db::{PgDeferralStore, PgLockStore, create_pool, run_migrations};
use decap_executor::KubernetesCluster;
use decap_scheduler::{
    BuildOrchestrator, DistributedLockService, InMemoryDeferralQueue, PodReaper, PodTemplate,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Lock and deferral storage selected by configuration.
pub struct Stores {
    pub locks: Arc<dyn LockStore>,
    pub deferrals: Arc<dyn DeferralStore>,
}

impl Stores {
    /// Process-local stores, for a single replica.
    pub fn in_memory() -> Self {
        Self {
            locks: Arc::new(MemoryLockStore::new()),
            deferrals: Arc::new(InMemoryDeferralQueue::new()),
        }
    }

    /// Open the configured stores, connecting to Postgres if either needs it.
    pub async fn connect(config: &SystemConfig) -> anyhow::Result<Self> {
        let pool = if config.lock_store == StoreBackend::Postgres
            || config.deferral_store == StoreBackend::Postgres
        {
            let url = config
                .database_url
                .as_deref()
                .context("database-url is required for postgres stores")?;
            info!("Connecting to database...");
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Some(pool)
        } else {
            None
        };

        Ok(Self::select(config, pool.as_ref()))
    }

    fn select(config: &SystemConfig, pool: Option<&PgPool>) -> Self {
        let memory = Self::in_memory();
        let locks: Arc<dyn LockStore> = match (config.lock_store, pool) {
            (StoreBackend::Postgres, Some(pool)) => Arc::new(PgLockStore::new(pool.clone())),
            _ => memory.locks,
        };
        let deferrals: Arc<dyn DeferralStore> = match (config.deferral_store, pool) {
            (StoreBackend::Postgres, Some(pool)) => Arc::new(PgDeferralStore::new(pool.clone())),
            _ => memory.deferrals,
        };
        Self { locks, deferrals }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BuildOrchestrator>,
    pub cluster: Arc<dyn PodCluster>,
    pub deferral_interval: Duration,
}

impl AppState {
    /// Connect to the cluster and the configured stores.
    pub async fn connect(config: &SystemConfig) -> anyhow::Result<Self> {
        let retry = RetryPolicy::new(config.retry.timeout, config.retry.max_attempts);
        let cluster = KubernetesCluster::new(config.namespace.clone(), retry)
            .await
            .context("failed to connect to Kubernetes")?;
        info!(namespace = %cluster.namespace(), "Connected to cluster");

        let stores = Stores::connect(config).await?;
        Ok(Self::new(config, Arc::new(cluster), stores))
    }

    pub fn new(config: &SystemConfig, cluster: Arc<dyn PodCluster>, stores: Stores) -> Self {
        let catalog = StaticProjectCatalog::new(config.projects.iter().cloned());
        info!(
            projects = catalog.len(),
            lock_store = stores.locks.name(),
            deferral_store = stores.deferrals.name(),
            "Loaded build configuration"
        );

        let template = PodTemplate::new(
            config.build_scripts.repository.clone(),
            config.build_scripts.branch.clone(),
        )
        .with_credentials_secret(config.credentials_secret.clone());

        let orchestrator = BuildOrchestrator::new(
            Arc::new(catalog),
            cluster.clone(),
            DistributedLockService::new(stores.locks, config.lock_ttl),
            stores.deferrals,
            template,
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            cluster,
            deferral_interval: config.deferral_interval,
        }
    }

    pub fn reaper(&self) -> PodReaper {
        PodReaper::new(self.cluster.clone())
    }
}
