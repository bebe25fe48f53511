//! Core data models for the storage emulator.
//!
//! Buckets and object versions map to database tables via `sqlx::FromRow`;
//! resumable sessions live only in memory.

pub mod bucket;
pub mod object;
pub mod session;
