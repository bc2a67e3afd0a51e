// src/uow/unit_of_work.rs
//
// Unit of work: owns one session and one optional transaction.
//
// STATE MACHINE:
//   Idle --begin--> Active --commit/rollback--> Idle
//
// INVARIANTS:
// - At most one open transaction; begin while Active is a no-op
// - Rollback while Idle is a no-op
// - commit either applies every pending change or discards all of them
// - The transaction handle is released on every exit path of commit
// - The session is disposed exactly once, by `close` or by `Drop`
//
// Single writer: every state-changing method takes `&mut self`. Sharing a
// unit of work across tasks needs an outer lock (see registry).

use std::fmt;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DataError, DataResult};
use crate::repositories::{Entity, Repository};
use crate::store::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Idle => write!(f, "idle"),
            TransactionState::Active => write!(f, "active"),
        }
    }
}

pub struct UnitOfWork<S: Session> {
    id: Uuid,
    session: S,
    transaction: Option<S::Transaction>,
    released: bool,
}

impl<S: Session> UnitOfWork<S> {
    pub fn new(session: S) -> Self {
        let id = Uuid::new_v4();
        debug!(
            "event=uow_open module=uow status=ok uow={} session={}",
            id,
            session.id()
        );

        Self {
            id,
            session,
            transaction: None,
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        if self.transaction.is_some() {
            TransactionState::Active
        } else {
            TransactionState::Idle
        }
    }

    /// Number of staged changes waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.session.pending_count()
    }

    /// Repository for `T` bound to this unit's session.
    pub fn repository<T: Entity>(&mut self) -> Repository<'_, T, S> {
        Repository::new(&mut self.session)
    }

    /// Flush pending changes.
    ///
    /// - Active: flush through the open transaction; the caller still has
    ///   to commit.
    /// - Idle: open a transaction, flush, commit. On failure the transaction
    ///   is rolled back, pending changes are discarded and the error is
    ///   returned.
    pub async fn save(&mut self) -> DataResult<usize> {
        if self.transaction.is_some() {
            return self.session.flush().await;
        }

        let transaction = self.session.begin_transaction().await?;
        let result = match self.session.flush().await {
            Ok(affected) => self
                .session
                .commit_transaction(&transaction)
                .await
                .map(|()| affected),
            Err(e) => Err(e),
        };

        match result {
            Ok(affected) => {
                info!(
                    "event=uow_save module=uow status=ok uow={} mode=auto affected={}",
                    self.id, affected
                );
                Ok(affected)
            }
            Err(cause) => Err(self.roll_back_after(&transaction, cause).await),
        }
    }

    /// Open a transaction. No-op when one is already active.
    pub async fn begin_transaction(&mut self) -> DataResult<()> {
        if self.transaction.is_some() {
            debug!(
                "event=uow_begin module=uow status=noop uow={} reason=already_active",
                self.id
            );
            return Ok(());
        }

        let transaction = self.session.begin_transaction().await?;
        self.transaction = Some(transaction);
        debug!("event=uow_begin module=uow status=ok uow={}", self.id);

        Ok(())
    }

    /// Flush pending changes and commit the active transaction, if any.
    ///
    /// Any failure runs the rollback path before the error is returned. The
    /// unit is Idle afterwards whatever the outcome.
    pub async fn commit_transaction(&mut self) -> DataResult<()> {
        let result = match self.flush_and_commit().await {
            Ok(affected) => {
                info!(
                    "event=uow_commit module=uow status=ok uow={} affected={}",
                    self.id, affected
                );
                Ok(())
            }
            Err(cause) => match self.transaction.take() {
                Some(transaction) => Err(self.roll_back_after(&transaction, cause).await),
                None => {
                    self.session.discard_pending();
                    warn!(
                        "event=uow_commit module=uow status=error uow={} error={}",
                        self.id, cause
                    );
                    Err(cause)
                }
            },
        };

        self.transaction = None;
        result
    }

    /// Roll back the active transaction. No-op when Idle.
    pub async fn rollback_transaction(&mut self) -> DataResult<()> {
        let Some(transaction) = self.transaction.take() else {
            debug!(
                "event=uow_rollback module=uow status=noop uow={} reason=idle",
                self.id
            );
            return Ok(());
        };

        self.session.discard_pending();
        let result = self.session.rollback_transaction(&transaction).await;
        match &result {
            Ok(()) => info!("event=uow_rollback module=uow status=ok uow={}", self.id),
            Err(e) => error!(
                "event=uow_rollback module=uow status=error uow={} error={}",
                self.id, e
            ),
        }

        result
    }

    /// Tear down: roll back a still-active transaction, then dispose the
    /// session. Dropping the unit without calling this releases it too.
    pub async fn close(mut self) -> DataResult<()> {
        let result = self.rollback_transaction().await;
        self.release();
        result
    }

    async fn flush_and_commit(&mut self) -> DataResult<usize> {
        let affected = self.session.flush().await?;
        if let Some(transaction) = self.transaction.as_ref() {
            self.session.commit_transaction(transaction).await?;
        }
        Ok(affected)
    }

    /// Roll back after `cause`. Returns the error the caller should see:
    /// `cause` itself, or `RollbackFailed` when the rollback broke too.
    async fn roll_back_after(&mut self, transaction: &S::Transaction, cause: DataError) -> DataError {
        warn!(
            "event=uow_rollback module=uow status=start uow={} cause={}",
            self.id, cause
        );
        self.session.discard_pending();

        match self.session.rollback_transaction(transaction).await {
            Ok(()) => cause,
            Err(rollback) => {
                error!(
                    "event=uow_rollback module=uow status=error uow={} error={}",
                    self.id, rollback
                );
                DataError::rollback_failed(rollback, cause)
            }
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.transaction.take().is_some() {
            warn!(
                "event=uow_release module=uow status=abandoned uow={} reason=active_transaction",
                self.id
            );
        }

        self.session.dispose();
        debug!("event=uow_release module=uow status=ok uow={}", self.id);
    }
}

impl<S: Session> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        self.release();
    }
}
