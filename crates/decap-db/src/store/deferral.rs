//! Deferral store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decap_core::deferral::DeferralStore;
use decap_core::{BuildEvent, BuildId, Result};
use sqlx::PgPool;
use tracing::debug;

use crate::DbError;

const QUEUE_CONTEXT: &str = "deferred builds";

/// A deferred build.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DeferredRow {
    team: String,
    project: String,
    git_ref: String,
    build_id: Option<uuid::Uuid>,
    deferred_at: DateTime<Utc>,
    seq: i64,
}

impl From<DeferredRow> for BuildEvent {
    fn from(row: DeferredRow) -> Self {
        BuildEvent {
            team: row.team,
            project: row.project,
            git_ref: row.git_ref,
            id: row.build_id.map(BuildId::from),
            deferred_at: Some(row.deferred_at),
        }
    }
}

/// Rows in first-deferred order; `seq` breaks timestamp ties.
fn into_events(mut rows: Vec<DeferredRow>) -> Vec<BuildEvent> {
    rows.sort_by_key(|r| (r.deferred_at, r.seq));
    rows.into_iter().map(BuildEvent::from).collect()
}

/// PostgreSQL implementation of DeferralStore, shared by all scheduler replicas.
pub struct PgDeferralStore {
    pool: PgPool,
}

impl PgDeferralStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeferralStore for PgDeferralStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn defer(&self, event: BuildEvent) -> Result<()> {
        let lock_name = event.lock_name();
        let result = sqlx::query(
            r#"
            INSERT INTO deferred_builds (lockname, team, project, git_ref, build_id, deferred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (lockname) DO NOTHING
            "#,
        )
        .bind(&lock_name)
        .bind(&event.team)
        .bind(&event.project)
        .bind(&event.git_ref)
        .bind(event.id.map(|id| *id.as_uuid()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from(e).into_storage(&lock_name))?;

        if result.rows_affected() == 0 {
            debug!(lock_name = %lock_name, "Build already deferred");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BuildEvent>> {
        let rows = sqlx::query_as::<_, DeferredRow>(
            "SELECT team, project, git_ref, build_id, deferred_at, seq FROM deferred_builds",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbError::from(e).into_storage(QUEUE_CONTEXT))?;
        Ok(into_events(rows))
    }

    async fn poll(&self) -> Result<Vec<BuildEvent>> {
        let rows = sqlx::query_as::<_, DeferredRow>(
            "DELETE FROM deferred_builds RETURNING team, project, git_ref, build_id, deferred_at, seq",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbError::from(e).into_storage(QUEUE_CONTEXT))?;
        Ok(into_events(rows))
    }

    async fn remove(&self, lock_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM deferred_builds WHERE lockname = $1")
            .bind(lock_name)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::from(e).into_storage(lock_name))?;
        Ok(())
    }
}
