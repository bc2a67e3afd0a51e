// src/store/sqlite_session.rs
//
// SQLite implementation of the store boundary
//
// PRINCIPLES:
// - One session = one pooled connection, never shared
// - Statements run on the blocking pool, never on the async executor
// - Flush runs inside a SAVEPOINT: atomic on its own, nests inside BEGIN
// - Explicit transactions use BEGIN IMMEDIATE so write conflicts surface
//   at begin time (SQLITE_BUSY -> DataError::Conflict)
// - Updates and deletes of unknown keys fail the flush, never silently

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{ChangeKind, ChangeSet, PendingChange, Record, RecordFilter, Session};
use crate::config::DataConfig;
use crate::db::{
    create_connection_pool, create_connection_pool_at, get_connection, initialize_database,
    ConnectionPool, PooledConn,
};
use crate::error::{DataError, DataResult};
use crate::uow::UnitOfWork;

/// Session factory over a pool of SQLite connections.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<ConnectionPool>,
}

impl SqliteStore {
    /// Open the configured database and make sure the schema exists.
    pub fn open(config: &DataConfig) -> DataResult<Self> {
        let pool = create_connection_pool(config)?;
        Self::from_pool(Arc::new(pool))
    }

    pub fn open_at(db_path: &Path, config: &DataConfig) -> DataResult<Self> {
        let pool = create_connection_pool_at(db_path, config)?;
        Self::from_pool(Arc::new(pool))
    }

    pub fn from_pool(pool: Arc<ConnectionPool>) -> DataResult<Self> {
        {
            let conn = get_connection(&pool)?;
            initialize_database(&conn)?;
        }

        info!(
            "event=store_open module=store status=ok max_connections={}",
            pool.max_size()
        );

        Ok(Self { pool })
    }

    /// Check out a connection for a new session. A connection that comes
    /// back from the pool inside a transaction is rolled back first.
    pub fn open_session(&self) -> DataResult<SqliteSession> {
        let conn = get_connection(&self.pool)?;
        if !conn.is_autocommit() {
            warn!("event=session_open module=store status=rollback reason=stale_transaction");
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(SqliteSession::new(conn))
    }

    /// A fresh unit of work owning its own session.
    pub fn unit_of_work(&self) -> DataResult<UnitOfWork<SqliteSession>> {
        Ok(UnitOfWork::new(self.open_session()?))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[derive(Debug)]
pub struct SqliteTransaction {
    id: Uuid,
    started_at: DateTime<Utc>,
}

impl SqliteTransaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// The session's connection. Statements run on tokio's blocking pool, so
/// the connection travels there behind the lock and stays owned by the
/// session in between.
type SharedConn = Arc<Mutex<PooledConn>>;

/// Run `op` on the blocking pool. A lock wait inside SQLite (busy timeout)
/// parks a blocking thread, never the async executor.
async fn run_blocking<F, R>(conn: SharedConn, op: F) -> DataResult<R>
where
    F: FnOnce(&mut Connection) -> DataResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn
            .lock()
            .map_err(|_| DataError::Other("Session connection lock poisoned".to_string()))?;
        let conn: &mut Connection = &mut guard;
        op(conn)
    })
    .await
    .map_err(|e| DataError::Other(format!("Task join error: {}", e)))?
}

pub struct SqliteSession {
    id: Uuid,
    conn: Option<SharedConn>,
    pending: ChangeSet,
    transaction: Option<Uuid>,
    /// Set when the connection is left in an unknown transaction state
    unusable: Option<String>,
}

fn disposed(session_id: Uuid) -> DataError {
    DataError::Other(format!("Session {} has been disposed", session_id))
}

fn load_collection(conn: &Connection, collection: &str) -> DataResult<Vec<Record>> {
    let mut stmt =
        conn.prepare("SELECT record_key, body FROM records WHERE collection = ?1 ORDER BY seq")?;

    let rows = stmt
        .query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(key, body)| Ok(Record::new(collection, key, serde_json::from_str(&body)?)))
        .collect()
}

fn apply_change(conn: &Connection, change: &PendingChange, now: &str) -> DataResult<usize> {
    let body = change
        .body
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let affected = match change.kind {
        ChangeKind::Insert => conn.execute(
            "INSERT INTO records (collection, record_key, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![change.collection, change.key, body, now],
        )?,
        ChangeKind::Update => conn.execute(
            "UPDATE records SET body = ?3, updated_at = ?4
             WHERE collection = ?1 AND record_key = ?2",
            params![change.collection, change.key, body, now],
        )?,
        ChangeKind::Delete => conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND record_key = ?2",
            params![change.collection, change.key],
        )?,
    };

    if affected == 0 {
        return Err(DataError::UntrackedEntity {
            collection: change.collection.clone(),
            key: change.key.clone(),
        });
    }

    Ok(affected)
}

impl SqliteSession {
    pub fn new(conn: PooledConn) -> Self {
        let id = Uuid::new_v4();
        debug!("event=session_open module=store status=ok session={}", id);

        Self {
            id,
            conn: Some(Arc::new(Mutex::new(conn))),
            pending: ChangeSet::new(),
            transaction: None,
            unusable: None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.conn.is_none()
    }

    fn connection(&self) -> DataResult<SharedConn> {
        if let Some(reason) = &self.unusable {
            return Err(DataError::Other(format!(
                "Session {} is unusable: {}",
                self.id, reason
            )));
        }
        self.conn.as_ref().map(Arc::clone).ok_or_else(|| disposed(self.id))
    }

    fn ensure_current(&self, transaction: &SqliteTransaction) -> DataResult<()> {
        match self.transaction {
            Some(id) if id == transaction.id => Ok(()),
            _ => Err(DataError::Other(format!(
                "Transaction {} is not active on session {}",
                transaction.id, self.id
            ))),
        }
    }
}

#[async_trait]
impl Session for SqliteSession {
    type Transaction = SqliteTransaction;

    fn id(&self) -> String {
        self.id.to_string()
    }

    async fn fetch_first(
        &mut self,
        collection: &str,
        filter: &RecordFilter<'_>,
    ) -> DataResult<Option<Record>> {
        for record in self.fetch_all(collection).await? {
            if filter(&record)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn fetch_all(&mut self, collection: &str) -> DataResult<Vec<Record>> {
        let conn = self.connection()?;
        let name = collection.to_string();
        let persisted = run_blocking(conn, move |conn| load_collection(conn, &name)).await?;
        Ok(self.pending.overlay(collection, persisted))
    }

    fn stage_insert(&mut self, record: Record) -> DataResult<()> {
        self.connection()?;
        self.pending.push(PendingChange::insert(record));
        Ok(())
    }

    fn stage_update(&mut self, record: Record) -> DataResult<()> {
        self.connection()?;
        self.pending.push(PendingChange::update(record));
        Ok(())
    }

    fn stage_delete(&mut self, collection: &str, key: &str) -> DataResult<()> {
        self.connection()?;
        self.pending.push(PendingChange::delete(collection, key));
        Ok(())
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                "event=pending_discard module=store session={} changes={}",
                self.id,
                self.pending.len()
            );
        }
        self.pending.clear();
    }

    /// Returns the number of records written: several staged changes to one
    /// record count once, an insert deleted before the flush counts zero.
    async fn flush(&mut self) -> DataResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let conn = self.connection()?;
        let changes = self.pending.coalesced();
        let affected = run_blocking(conn, move |conn| {
            let now = Utc::now().to_rfc3339();
            // Dropping the savepoint on error rolls the partial flush back
            let savepoint = conn.savepoint()?;
            let mut affected = 0;
            for change in &changes {
                affected += apply_change(&savepoint, change, &now)?;
            }
            savepoint.commit()?;
            Ok(affected)
        })
        .await?;

        debug!(
            "event=flush module=store status=ok session={} changes={} affected={}",
            self.id,
            self.pending.len(),
            affected
        );
        self.pending.clear();

        Ok(affected)
    }

    async fn begin_transaction(&mut self) -> DataResult<SqliteTransaction> {
        if let Some(active) = self.transaction {
            return Err(DataError::Other(format!(
                "Session {} already has transaction {} open",
                self.id, active
            )));
        }

        let conn = self.connection()?;
        run_blocking(conn, |conn| {
            conn.execute_batch("BEGIN IMMEDIATE").map_err(DataError::from)
        })
        .await?;

        let transaction = SqliteTransaction {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        self.transaction = Some(transaction.id);

        Ok(transaction)
    }

    async fn commit_transaction(&mut self, transaction: &SqliteTransaction) -> DataResult<()> {
        self.ensure_current(transaction)?;

        let conn = self.connection()?;
        run_blocking(conn, |conn| conn.execute_batch("COMMIT").map_err(DataError::from)).await?;
        self.transaction = None;

        debug!(
            "event=tx_commit module=store status=ok session={} tx={} held_ms={}",
            self.id,
            transaction.id,
            (Utc::now() - transaction.started_at()).num_milliseconds()
        );
        Ok(())
    }

    async fn rollback_transaction(&mut self, transaction: &SqliteTransaction) -> DataResult<()> {
        self.ensure_current(transaction)?;

        let conn = self.connection()?;
        let result = run_blocking(conn, |conn| {
            // SQLite may already have rolled back on its own (e.g. after SQLITE_FULL)
            if conn.is_autocommit() {
                return Ok(());
            }
            conn.execute_batch("ROLLBACK").map_err(DataError::from)
        })
        .await;
        self.transaction = None;

        if let Err(e) = &result {
            error!(
                "event=tx_rollback module=store status=error session={} tx={} error={}",
                self.id, transaction.id, e
            );
            // Until dispose, every call reports this instead of whatever
            // the half-open connection would say
            self.unusable = Some(format!("rollback of transaction {} failed: {}", transaction.id, e));
        }
        result
    }

    fn dispose(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            if !guard.is_autocommit() {
                warn!(
                    "event=session_dispose module=store status=rollback session={} reason=open_transaction",
                    self.id
                );
                if let Err(e) = guard.execute_batch("ROLLBACK") {
                    error!(
                        "event=session_dispose module=store status=error session={} error={}",
                        self.id, e
                    );
                }
            }
        }

        self.pending.clear();
        self.transaction = None;
        self.unusable = None;
        debug!("event=session_dispose module=store status=ok session={}", self.id);
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
