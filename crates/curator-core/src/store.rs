//! Boundary contracts consumed by the ingest pipeline.
//!
//! Implementations live in `curator-storage` (SQLite and in-memory). Every
//! call is its own commit point; the pipeline never rolls back across calls.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Actor, AttachOptions, BinaryRef, FileSet, IncomingFile, IndexDocument, Lineage, Version,
};

/// Object store holding file sets and their binaries.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Load the persisted state of a file set. `NotFound` if it does not exist.
    async fn find(&self, file_set_id: &str) -> Result<FileSet>;

    /// Write `file` as the current binary of `relation` and point the
    /// in-memory `file_set` at it. The relation is only durable once
    /// [`RepositoryStore::persist`] succeeds.
    async fn attach(
        &self,
        file_set: &mut FileSet,
        relation: &str,
        file: IncomingFile,
        options: AttachOptions,
    ) -> Result<BinaryRef>;

    /// Save the file set's relations and characteristics.
    async fn persist(&self, file_set: &FileSet) -> Result<()>;

    /// Replace the relation's current content with a prior version's.
    /// `NotFound` if the relation or the version does not exist.
    async fn restore_version(
        &self,
        file_set: &mut FileSet,
        relation: &str,
        version_id: &str,
    ) -> Result<BinaryRef>;

    /// Fresh copy of the persisted state of `file_set`.
    async fn reload(&self, file_set: &FileSet) -> Result<FileSet> {
        self.find(&file_set.id).await
    }

    /// Metadata and current content of a binary.
    async fn read_binary(&self, binary_id: &str) -> Result<(BinaryRef, Vec<u8>)>;

    /// Parent work and its collections, resolved in one call.
    async fn lineage(&self, file_set_id: &str) -> Result<Lineage>;
}

/// Append-only version history.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Snapshot the binary's current content, attributed to `actor`.
    async fn record_version(&self, binary: &BinaryRef, actor: &Actor) -> Result<Version>;

    /// All versions of a binary, oldest first.
    async fn versions(&self, binary_id: &str) -> Result<Vec<Version>>;
}

/// Search index that receives republished documents.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn publish(&self, document: IndexDocument) -> Result<()>;
}
