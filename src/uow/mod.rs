// src/uow/mod.rs
//
// Unit of work - transaction coordination across repositories

pub mod unit_of_work;


pub use unit_of_work::{TransactionState, UnitOfWork};
