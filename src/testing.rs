// src/testing.rs
//
// Shared test fixtures: sample entities, a throwaway on-disk store, and a
// session wrapper that counts calls and injects store failures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

use crate::config::DataConfig;
use crate::error::{DataError, DataResult};
use crate::repositories::Entity;
use crate::store::{Record, RecordFilter, Session, SqliteSession, SqliteStore};
use crate::uow::UnitOfWork;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: u32,
    pub name: String,
    pub tier: String,
}

impl Customer {
    pub fn new(id: u32, name: &str, tier: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            tier: tier.to_string(),
        }
    }
}

impl Entity for Customer {
    const COLLECTION: &'static str = "customers";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: u32,
    pub total_cents: i64,
}

impl Order {
    pub fn new(id: &str, customer_id: u32, total_cents: i64) -> Self {
        Self {
            id: id.to_string(),
            customer_id,
            total_cents,
        }
    }
}

impl Entity for Order {
    const COLLECTION: &'static str = "orders";

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Raw customer record, for tests below the repository layer.
pub fn customer(id: u32, name: &str) -> Record {
    Record::new(
        "customers",
        id.to_string(),
        json!({ "id": id, "name": name, "tier": "standard" }),
    )
}

/// Store on a fresh temp file. Keep the `TempDir` alive for the test.
///
/// The short busy timeout turns lock waits into quick conflicts.
pub fn test_store() -> (TempDir, SqliteStore) {
    test_store_with_busy_timeout(50)
}

pub fn test_store_with_busy_timeout(busy_timeout_ms: u64) -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let config = DataConfig {
        pool_max_size: 8,
        busy_timeout_ms,
        connection_timeout_ms: 2_000,
        ..DataConfig::default()
    };
    let store = SqliteStore::open_at(&dir.path().join("store.db"), &config).unwrap();
    (dir, store)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Conflict,
    Store,
}

impl Fault {
    fn error(self) -> DataError {
        match self {
            Fault::Conflict => DataError::Conflict("injected concurrent modification".to_string()),
            Fault::Store => DataError::Other("injected store failure".to_string()),
        }
    }
}

/// Call counters and one-shot faults, shared with the test body.
#[derive(Debug, Default)]
pub struct SessionProbe {
    pub fail_begin: Option<Fault>,
    pub fail_flush: Option<Fault>,
    pub fail_commit: Option<Fault>,
    pub fail_rollback: Option<Fault>,
    pub begins: usize,
    pub flushes: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub disposals: usize,
}

pub type Probe = Arc<Mutex<SessionProbe>>;

pub struct FaultySession<S: Session> {
    inner: S,
    probe: Probe,
}

impl<S: Session> FaultySession<S> {
    pub fn new(inner: S) -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                inner,
                probe: probe.clone(),
            },
            probe,
        )
    }

    fn record<F>(&self, update: F) -> Option<Fault>
    where
        F: FnOnce(&mut SessionProbe) -> Option<Fault>,
    {
        let mut probe = self.probe.lock().unwrap();
        update(&mut probe)
    }
}

/// Unit of work over a probed session of `store`.
pub fn probed_unit_of_work(store: &SqliteStore) -> (UnitOfWork<FaultySession<SqliteSession>>, Probe) {
    let (session, probe) = FaultySession::new(store.open_session().unwrap());
    (UnitOfWork::new(session), probe)
}

#[async_trait]
impl<S: Session> Session for FaultySession<S> {
    type Transaction = S::Transaction;

    fn id(&self) -> String {
        self.inner.id()
    }

    async fn fetch_first(
        &mut self,
        collection: &str,
        filter: &RecordFilter<'_>,
    ) -> DataResult<Option<Record>> {
        self.inner.fetch_first(collection, filter).await
    }

    async fn fetch_all(&mut self, collection: &str) -> DataResult<Vec<Record>> {
        self.inner.fetch_all(collection).await
    }

    fn stage_insert(&mut self, record: Record) -> DataResult<()> {
        self.inner.stage_insert(record)
    }

    fn stage_update(&mut self, record: Record) -> DataResult<()> {
        self.inner.stage_update(record)
    }

    fn stage_delete(&mut self, collection: &str, key: &str) -> DataResult<()> {
        self.inner.stage_delete(collection, key)
    }

    fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }

    fn discard_pending(&mut self) {
        self.inner.discard_pending()
    }

    async fn flush(&mut self) -> DataResult<usize> {
        let fault = self.record(|p| {
            p.flushes += 1;
            p.fail_flush.take()
        });
        if let Some(fault) = fault {
            return Err(fault.error());
        }
        self.inner.flush().await
    }

    async fn begin_transaction(&mut self) -> DataResult<Self::Transaction> {
        let fault = self.record(|p| {
            p.begins += 1;
            p.fail_begin.take()
        });
        if let Some(fault) = fault {
            return Err(fault.error());
        }
        self.inner.begin_transaction().await
    }

    async fn commit_transaction(&mut self, transaction: &Self::Transaction) -> DataResult<()> {
        let fault = self.record(|p| {
            p.commits += 1;
            p.fail_commit.take()
        });
        if let Some(fault) = fault {
            return Err(fault.error());
        }
        self.inner.commit_transaction(transaction).await
    }

    async fn rollback_transaction(&mut self, transaction: &Self::Transaction) -> DataResult<()> {
        let fault = self.record(|p| {
            p.rollbacks += 1;
            p.fail_rollback.take()
        });
        if let Some(fault) = fault {
            return Err(fault.error());
        }
        self.inner.rollback_transaction(transaction).await
    }

    fn dispose(&mut self) {
        self.record(|p| {
            p.disposals += 1;
            None
        });
        self.inner.dispose();
    }
}
