// src/repositories/repository.rs
//
// Generic repository over a borrowed session
//
// Write-deferral contract: add/update/delete only stage changes in the
// session. Nothing is durable until `save_local` or a unit of work commit.

use std::marker::PhantomData;

use log::debug;

use crate::error::DataResult;
use crate::store::{Record, Session};

use super::Entity;

/// Repository for entities of type `T`, bound to one session.
///
/// The repository borrows the session mutably, so it can never outlive it
/// and has no way to dispose it.
pub struct Repository<'s, T, S>
where
    T: Entity,
    S: Session,
{
    session: &'s mut S,
    _entity: PhantomData<fn() -> T>,
}

impl<'s, T, S> Repository<'s, T, S>
where
    T: Entity,
    S: Session,
{
    pub fn new(session: &'s mut S) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    /// First entity matching `predicate`, or `None` when nothing matches.
    ///
    /// With several matches the first in store order wins (SQLite store:
    /// insertion order, staged inserts last). "No match" is not an error so
    /// callers can tell it apart from a store failure.
    pub async fn get<P>(&mut self, predicate: P) -> DataResult<Option<T>>
    where
        P: Fn(&T) -> bool + Send + Sync,
    {
        let filter = move |record: &Record| -> DataResult<bool> {
            let entity = T::from_record(record)?;
            Ok(predicate(&entity))
        };

        match self.session.fetch_first(T::COLLECTION, &filter).await? {
            Some(record) => Ok(Some(T::from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Every entity of type `T` visible in the session, staged changes
    /// included. No ordering guarantee.
    pub async fn get_all(&mut self) -> DataResult<Vec<T>> {
        self.session
            .fetch_all(T::COLLECTION)
            .await?
            .iter()
            .map(T::from_record)
            .collect()
    }

    pub async fn count(&mut self) -> DataResult<usize> {
        Ok(self.session.fetch_all(T::COLLECTION).await?.len())
    }

    /// Stage an insert.
    pub fn add(&mut self, entity: &T) -> DataResult<()> {
        let record = entity.to_record()?;
        debug!(
            "event=stage module=repository kind=insert collection={} key={}",
            record.collection, record.key
        );
        self.session.stage_insert(record)
    }

    /// Stage an update of an entity the store already holds.
    ///
    /// Staging always succeeds. If no record with `entity.key()` exists when
    /// the change is flushed, the whole flush fails with
    /// `DataError::UntrackedEntity`.
    pub fn update(&mut self, entity: &T) -> DataResult<()> {
        let record = entity.to_record()?;
        debug!(
            "event=stage module=repository kind=update collection={} key={}",
            record.collection, record.key
        );
        self.session.stage_update(record)
    }

    /// Stage a removal. Unknown keys fail the flush like `update`.
    pub fn delete(&mut self, entity: &T) -> DataResult<()> {
        let key = entity.key();
        debug!(
            "event=stage module=repository kind=delete collection={} key={}",
            T::COLLECTION,
            key
        );
        self.session.stage_delete(T::COLLECTION, &key)
    }

    /// Flush every staged change of the session (not only this
    /// repository's) without unit of work coordination.
    pub async fn save_local(&mut self) -> DataResult<usize> {
        self.session.flush().await
    }
}
