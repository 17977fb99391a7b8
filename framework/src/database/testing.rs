//! Isolated databases for tests

use sea_orm_migration::MigratorTrait;

use crate::database::{DatabaseConfig, DbConnection};
use crate::error::WorkflowError;

/// A private in-memory SQLite database with migrations applied
///
/// A single pooled connection keeps the in-memory database alive for the
/// lifetime of the value.
///
/// # Example
///
/// ```rust,ignore
/// let db = TestDatabase::fresh::<Migrator>().await?;
/// let store = SeaOrmWorkflowStore::new(db.connection());
/// ```
pub struct TestDatabase {
    conn: DbConnection,
}

impl TestDatabase {
    /// Create a new database and run every migration of `M`
    pub async fn fresh<M: MigratorTrait>() -> Result<Self, WorkflowError> {
        let config = DatabaseConfig::builder()
            .url("sqlite::memory:")
            .max_connections(1)
            .min_connections(1)
            .logging(false)
            .build();

        let conn = DbConnection::connect(&config).await?;
        M::up(conn.inner(), None).await?;

        Ok(Self { conn })
    }

    /// Connection handle to pass to stores
    pub fn connection(&self) -> DbConnection {
        self.conn.clone()
    }
}
