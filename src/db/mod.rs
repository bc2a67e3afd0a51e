// src/db/mod.rs
//
// Database module
//
// Provides:
// - Connection pooling
// - Record store schema

pub mod connection;
pub mod migrations;

pub use connection::{
    create_connection_pool, create_connection_pool_at, get_connection, ConnectionPool, PooledConn,
};

pub use migrations::initialize_database;
