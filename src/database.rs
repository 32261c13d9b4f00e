use secrecy::ExposeSecret;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Database connection pool type
pub type DbPool = sqlx::PgPool;

/// Database connection type - supports both pool connections and transactions
/// Use `conn.as_mut()` for pool connections, `tx.as_mut()` for transactions
pub type DbConn = sqlx::PgConnection;

/// Connects to PostgreSQL and applies the bundled migrations.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    let pool = DbPool::connect(config.connection_string().expose_secret()).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| crate::error::Error::Internal(format!("Migration failed: {}", e)))?;

    tracing::info!(
        host = %config.host,
        database = %config.database,
        "[Database] Connected and migrations applied"
    );

    Ok(pool)
}
