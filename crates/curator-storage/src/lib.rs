//! Curator Storage crate - SQLite persistence and in-memory stores.
//!
//! Provides a WAL-mode SQLite database with migrations, a repository and
//! version store for file sets and their binaries, a search index table, and
//! in-memory equivalents of all three.

pub mod db;
pub mod index;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use index::{IndexedDocument, SqliteSearchIndex};
pub use memory::{MemoryRepository, MemorySearchIndex};
pub use repository::SqliteRepository;
