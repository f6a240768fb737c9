//! Database error types.

use berth_reconcile::StoreError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/control-plane.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A stored row could not be decoded into the domain model.
    #[error("corrupt {what}: {reason}")]
    Corrupt { what: String, reason: String },

    /// The port sequence ran past the last usable port.
    #[error("port range exhausted at {0}")]
    PortsExhausted(i64),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub(crate) fn corrupt(what: impl Into<String>, reason: impl ToString) -> Self {
        DbError::Corrupt {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Corrupt { what, reason } => StoreError::Corrupt { what, reason },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// True for Postgres unique-constraint violations.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_maps_to_store_corrupt() {
        let err: StoreError = DbError::corrupt("channel chan_x", "bad selection").into();
        assert_eq!(
            err,
            StoreError::Corrupt {
                what: "channel chan_x".to_string(),
                reason: "bad selection".to_string(),
            }
        );
    }

    #[test]
    fn test_other_errors_map_to_backend() {
        let err: StoreError = DbError::PortsExhausted(70000).into();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("70000")));
    }
}
