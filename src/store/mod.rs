// src/store/mod.rs
//
// Store boundary
//
// A Session is one exclusively-owned connection to the backing store.
// Everything above this module (repositories, unit of work) talks to the
// store only through this trait.
//
// CONTRACT:
// - stage_* only records intent; nothing is durable until flush
// - flush applies every staged change or none of them
// - a failed flush keeps the staged changes; discard_pending drops them
// - dispose is synchronous, idempotent, and rolls back an open transaction

pub mod change_set;
pub mod sqlite_session;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DataResult;

pub use change_set::{ChangeKind, ChangeSet, PendingChange};
pub use sqlite_session::{SqliteSession, SqliteStore, SqliteTransaction};

/// Untyped unit that crosses the store boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub collection: String,
    pub key: String,
    pub body: serde_json::Value,
}

impl Record {
    pub fn new(collection: impl Into<String>, key: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            body,
        }
    }
}

/// Caller-supplied predicate, applied by the store to candidate records.
/// May borrow from the caller for `'a`.
pub type RecordFilter<'a> = dyn Fn(&Record) -> DataResult<bool> + Send + Sync + 'a;

#[async_trait]
pub trait Session: Send {
    /// Handle for one open transaction. Dropping it releases it.
    type Transaction: Send + Sync;

    /// Opaque identifier, used for logging.
    fn id(&self) -> String;

    /// First record of `collection` matching `filter`, in store order.
    /// Staged changes are visible.
    async fn fetch_first(
        &mut self,
        collection: &str,
        filter: &RecordFilter<'_>,
    ) -> DataResult<Option<Record>>;

    /// Every visible record of `collection`, staged changes included.
    async fn fetch_all(&mut self, collection: &str) -> DataResult<Vec<Record>>;

    fn stage_insert(&mut self, record: Record) -> DataResult<()>;

    fn stage_update(&mut self, record: Record) -> DataResult<()>;

    fn stage_delete(&mut self, collection: &str, key: &str) -> DataResult<()>;

    fn pending_count(&self) -> usize;

    fn discard_pending(&mut self);

    /// Apply all staged changes, returning the number of affected records.
    async fn flush(&mut self) -> DataResult<usize>;

    async fn begin_transaction(&mut self) -> DataResult<Self::Transaction>;

    async fn commit_transaction(&mut self, transaction: &Self::Transaction) -> DataResult<()>;

    async fn rollback_transaction(&mut self, transaction: &Self::Transaction) -> DataResult<()>;

    /// Release the underlying connection.
    fn dispose(&mut self);
}
