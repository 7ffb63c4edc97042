//! Depot DB Library
//!
//! Persistence for upload records and the outbox log. Every repository comes in two
//! flavours with the same guard semantics: Postgres (sqlx) and in-memory.

pub mod db;

pub use db::*;
