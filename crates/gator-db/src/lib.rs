//! Persistence layer: row models and query functions backing the mission
//! engine in `gator-core`.
//!
//! This crate owns the schema and all SQL; `gator-core` never issues a
//! query directly. Every table is append-friendly where it matters
//! (checkpoints, test results, review feedback are never updated in
//! place, only inserted) so the mission's history can be replayed.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
