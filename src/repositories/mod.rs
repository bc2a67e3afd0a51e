// src/repositories/mod.rs
//
// Repository layer
//
// CRITICAL RULES:
// - Repositories are DUMB data mappers over a borrowed session
// - NO business logic
// - NO transaction control (that is the unit of work's job)
// - Mutations only stage; nothing is durable before a flush

pub mod entity;
pub mod repository;

pub use entity::Entity;
pub use repository::Repository;
