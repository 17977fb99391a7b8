//! Database connection management

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;

use crate::database::config::DatabaseConfig;
use crate::error::WorkflowError;

/// Clonable handle to a SeaORM connection pool
///
/// # Example
///
/// ```rust,ignore
/// let conn = DbConnection::connect(&config).await?;
/// let store = SeaOrmWorkflowStore::new(conn.clone());
/// ```
#[derive(Clone)]
pub struct DbConnection {
    inner: Arc<DatabaseConnection>,
}

impl DbConnection {
    /// Open a pool from config
    ///
    /// File-backed SQLite databases are created on first use.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, WorkflowError> {
        let url = sqlite_url(&config.url).unwrap_or_else(|| config.url.clone());

        let mut opt = ConnectOptions::new(&url);
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .sqlx_logging(config.logging);

        let conn = Database::connect(opt).await?;

        tracing::debug!(
            url = %redact(&config.url),
            backend = ?config.database_type(),
            "database connected"
        );

        Ok(Self::from_connection(conn))
    }

    /// Wrap an already opened connection
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self {
            inner: Arc::new(conn),
        }
    }

    /// Get a reference to the underlying SeaORM connection
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }
}

impl AsRef<DatabaseConnection> for DbConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

impl std::ops::Deref for DbConnection {
    type Target = DatabaseConnection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Rewrite `sqlite://path` into the form SQLite wants, creating the file
///
/// Returns None for non-SQLite URLs and in-memory databases.
fn sqlite_url(url: &str) -> Option<String> {
    let path = url.strip_prefix("sqlite://")?;
    let path = path.trim_start_matches("./");

    if path.starts_with(":memory:") {
        return None;
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    Some(format!("sqlite:{}?mode=rwc", path))
}

/// Strip credentials from a URL before logging it
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
