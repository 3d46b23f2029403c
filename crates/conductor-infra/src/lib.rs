//! Infrastructure layer for Conductor.
//!
//! Implements the store trait from `conductor-core` on SQLite and loads the
//! engine configuration from disk.

pub mod config;
pub mod sqlite;
