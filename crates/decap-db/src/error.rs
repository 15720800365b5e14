//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Convert into a core storage error naming the key involved.
    pub fn into_storage(self, context: impl Into<String>) -> decap_core::Error {
        decap_core::Error::storage(context, self)
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
