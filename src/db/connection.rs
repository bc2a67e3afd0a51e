// src/db/connection.rs
//
// Database connection management
//
// PRINCIPLES:
// - Explicit connection pooling
// - No hidden connection creation
// - Clear error propagation
// - Thread-safe access

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

use crate::config::DataConfig;
use crate::error::{DataError, DataResult};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled connection
pub type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Create a connection pool for the configured database file
pub fn create_connection_pool(config: &DataConfig) -> DataResult<ConnectionPool> {
    let db_path = config.resolve_database_path()?;
    create_connection_pool_at(&db_path, config)
}

/// Create a connection pool for an explicit database file
///
/// Every connection gets:
/// - WAL journal so readers do not block the single writer
/// - Foreign keys enabled
/// - Busy timeout from the config, after which SQLITE_BUSY surfaces as a conflict
pub fn create_connection_pool_at(db_path: &Path, config: &DataConfig) -> DataResult<ConnectionPool> {
    let busy_timeout_ms = config.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(move |conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;"
            )?;
            conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
            Ok(())
        });

    let pool = Pool::builder()
        .max_size(config.pool_max_size)
        .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
        .build(manager)
        .map_err(|e| DataError::Pool(format!("Failed to create connection pool: {}", e)))?;

    Ok(pool)
}

/// Get a connection from the pool
///
/// This is a convenience wrapper that provides better error messages.
pub fn get_connection(pool: &ConnectionPool) -> DataResult<PooledConn> {
    pool.get()
        .map_err(|e| DataError::Pool(format!("Failed to get database connection: {}", e)))
}

/// Create a standalone in-memory connection (for testing)
#[cfg(test)]
pub(crate) fn create_test_connection() -> DataResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open_in_memory()?;

    conn.execute_batch(
        "PRAGMA foreign_keys = ON;"
    )?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_pool_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            pool_max_size: 2,
            ..DataConfig::default()
        };
        let pool = create_connection_pool_at(&dir.path().join("pool.db"), &config).unwrap();
        let conn = get_connection(&pool).unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk_enabled, 1);

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_pool_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            database_path: Some(dir.path().join("configured").join("app.db")),
            pool_max_size: 1,
            ..DataConfig::default()
        };

        let pool = create_connection_pool(&config).unwrap();
        drop(get_connection(&pool).unwrap());

        assert!(dir.path().join("configured").join("app.db").exists());
    }

    #[test]
    fn test_test_connection() {
        let conn = create_test_connection().unwrap();

        let result: i32 = conn
            .query_row("SELECT 1 + 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(result, 2);
    }
}
