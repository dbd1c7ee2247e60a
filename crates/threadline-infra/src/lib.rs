//! Infrastructure layer for Threadline.
//!
//! Contains implementations of the store trait defined in `threadline-core`:
//! the SQLite checkpoint store (WAL, split reader/writer pools), its
//! blocking facade, and configuration file loading.

pub mod blocking;
pub mod config;
pub mod sqlite;
