//! Lock store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decap_core::Result;
use decap_core::lock::{LockRecord, LockStore};
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    lockname: String,
    expires_at: DateTime<Utc>,
}

/// PostgreSQL implementation of LockStore.
///
/// The conditional write is a single upsert whose update branch only fires when
/// the existing row has expired, so concurrent acquirers are ordered by the
/// primary key.
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn put_if_absent_or_expired(
        &self,
        record: &LockRecord,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO build_locks (lockname, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (lockname) DO UPDATE
            SET expires_at = EXCLUDED.expires_at
            WHERE build_locks.expires_at < $3
            "#,
        )
        .bind(&record.name)
        .bind(record.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from(e).into_storage(&record.name))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM build_locks WHERE lockname = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::from(e).into_storage(name))?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<LockRecord>> {
        let row = sqlx::query_as::<_, LockRow>(
            "SELECT lockname, expires_at FROM build_locks WHERE lockname = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DbError::from(e).into_storage(name))?;
        Ok(row.map(|r| LockRecord {
            name: r.lockname,
            expires_at: r.expires_at,
        }))
    }
}
