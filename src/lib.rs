// src/lib.rs
// CoreBase - Generic repository and unit-of-work data access layer
//
// Architecture:
// - Store boundary: one exclusively-owned Session per unit of work
// - Repositories: typed, stateless façades that only stage changes
// - Unit of work: transaction state machine over one session
// - Registry: explicit bindings with per-scope lifetime

// ============================================================================
// CORE
// ============================================================================

pub mod repositories;
pub mod store;
pub mod uow;

// ============================================================================
// AMBIENT
// ============================================================================

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// PUBLIC API - Core
// ============================================================================

pub use repositories::{Entity, Repository};
pub use store::{
    ChangeKind, PendingChange, Record, RecordFilter, Session, SqliteSession, SqliteStore,
    SqliteTransaction,
};
pub use uow::{TransactionState, UnitOfWork};

// ============================================================================
// PUBLIC API - Errors, Configuration, Wiring
// ============================================================================

pub use config::{DataConfig, LoggingConfig};
pub use error::{DataError, DataResult};
pub use logging::init_logging;
pub use registry::{Registry, Scope, SharedUnitOfWork};
