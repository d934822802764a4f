//! In-memory repository, version store and search index.
//!
//! Used by tests and by the CLI's `--in-memory` mode. The repository can be
//! told to fail upcoming `persist` calls so failure paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use curator_core::error::{CuratorError, Result};
use curator_core::store::{RepositoryStore, SearchIndex, VersionStore};
use curator_core::types::{
    Actor, AttachOptions, BinaryRef, DocumentKind, FileRelation, FileSet, IncomingFile,
    IndexDocument, Lineage, ParentWork, Version,
};

struct StoredBinary {
    info: BinaryRef,
    content: Vec<u8>,
}

struct StoredVersion {
    version: Version,
    info: BinaryRef,
    content: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    file_sets: HashMap<String, FileSet>,
    binaries: HashMap<String, StoredBinary>,
    versions: Vec<StoredVersion>,
    works: HashMap<String, ParentWork>,
}

/// Repository and version store held entirely in memory.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    failing_persists: AtomicU32,
    persist_calls: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| CuratorError::Storage(format!("Lock poisoned: {}", e)))
    }

    /// Store a file set as if it had been persisted.
    pub fn insert_file_set(&self, file_set: FileSet) -> Result<()> {
        self.lock()?
            .file_sets
            .insert(file_set.id.clone(), file_set);
        Ok(())
    }

    pub fn register_work(&self, work: ParentWork) -> Result<()> {
        self.lock()?.works.insert(work.id.clone(), work);
        Ok(())
    }

    /// Make the next `count` calls to `persist` fail.
    pub fn fail_next_persists(&self, count: u32) {
        self.failing_persists.store(count, Ordering::SeqCst);
    }

    /// Number of `persist` calls, failed ones included.
    pub fn persist_count(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Number of versions recorded for a binary.
    pub fn version_count(&self, binary_id: &str) -> usize {
        self.lock()
            .map(|s| {
                s.versions
                    .iter()
                    .filter(|v| v.version.binary_id == binary_id)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Total number of versions across all binaries.
    pub fn total_versions(&self) -> usize {
        self.lock().map(|s| s.versions.len()).unwrap_or(0)
    }

    fn take_persist_failure(&self) -> bool {
        self.failing_persists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn snapshot(state: &mut MemoryState, binary_id: &str, actor: &Actor) -> Result<Version> {
        let stored = state
            .binaries
            .get(binary_id)
            .ok_or_else(|| CuratorError::NotFound(format!("binary {}", binary_id)))?;
        let seq = state
            .versions
            .iter()
            .filter(|v| v.version.binary_id == binary_id)
            .count()
            + 1;
        let version = Version {
            id: Uuid::new_v4().to_string(),
            binary_id: binary_id.to_string(),
            relation: stored.info.relation.clone(),
            label: format!("version{}", seq),
            actor: actor.clone(),
            created_at: Utc::now(),
        };
        let entry = StoredVersion {
            version: version.clone(),
            info: stored.info.clone(),
            content: stored.content.clone(),
        };
        state.versions.push(entry);
        Ok(version)
    }
}

#[async_trait]
impl RepositoryStore for MemoryRepository {
    async fn find(&self, file_set_id: &str) -> Result<FileSet> {
        self.lock()?
            .file_sets
            .get(file_set_id)
            .cloned()
            .ok_or_else(|| CuratorError::NotFound(format!("file set {}", file_set_id)))
    }

    async fn attach(
        &self,
        file_set: &mut FileSet,
        relation: &str,
        file: IncomingFile,
        options: AttachOptions,
    ) -> Result<BinaryRef> {
        let id = file_set
            .binary(relation)
            .map(|b| b.id.clone())
            .unwrap_or_else(|| format!("{}/files/{}", file_set.id, Uuid::new_v4()));
        let info = BinaryRef {
            id: id.clone(),
            container_id: file_set.id.clone(),
            relation: relation.to_string(),
            mime_type: file.mime_type,
            original_name: file.original_name,
            size: file.content.len() as u64,
        };

        let mut state = self.lock()?;
        state.binaries.insert(
            id.clone(),
            StoredBinary {
                info: info.clone(),
                content: file.content,
            },
        );
        if options.versioning {
            Self::snapshot(&mut state, &id, &Actor::new("system"))?;
        }
        drop(state);

        file_set.relations.insert(
            relation.to_string(),
            FileRelation {
                name: relation.to_string(),
                binary: info.clone(),
            },
        );
        Ok(info)
    }

    async fn persist(&self, file_set: &FileSet) -> Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_persist_failure() {
            return Err(CuratorError::Persistence(format!(
                "file set {}: injected failure",
                file_set.id
            )));
        }
        self.lock()?
            .file_sets
            .insert(file_set.id.clone(), file_set.clone());
        Ok(())
    }

    async fn restore_version(
        &self,
        file_set: &mut FileSet,
        relation: &str,
        version_id: &str,
    ) -> Result<BinaryRef> {
        let binary_id = file_set
            .binary(relation)
            .map(|b| b.id.clone())
            .ok_or_else(|| {
                CuratorError::NotFound(format!(
                    "relation {} on file set {}",
                    relation, file_set.id
                ))
            })?;

        let mut state = self.lock()?;
        let (info, content) = state
            .versions
            .iter()
            .find(|v| v.version.id == version_id && v.version.binary_id == binary_id)
            .map(|v| (v.info.clone(), v.content.clone()))
            .ok_or_else(|| {
                CuratorError::NotFound(format!("version {} of {}", version_id, binary_id))
            })?;
        state.binaries.insert(
            binary_id,
            StoredBinary {
                info: info.clone(),
                content,
            },
        );
        drop(state);

        file_set.relations.insert(
            relation.to_string(),
            FileRelation {
                name: relation.to_string(),
                binary: info.clone(),
            },
        );
        Ok(info)
    }

    async fn read_binary(&self, binary_id: &str) -> Result<(BinaryRef, Vec<u8>)> {
        self.lock()?
            .binaries
            .get(binary_id)
            .map(|b| (b.info.clone(), b.content.clone()))
            .ok_or_else(|| CuratorError::NotFound(format!("binary {}", binary_id)))
    }

    async fn lineage(&self, file_set_id: &str) -> Result<Lineage> {
        let state = self.lock()?;
        let file_set = state
            .file_sets
            .get(file_set_id)
            .ok_or_else(|| CuratorError::NotFound(format!("file set {}", file_set_id)))?;
        let parent = file_set.parent_id.as_ref().map(|parent_id| {
            state.works.get(parent_id).cloned().unwrap_or(ParentWork {
                id: parent_id.clone(),
                ..ParentWork::default()
            })
        });
        Ok(Lineage { parent })
    }
}

#[async_trait]
impl VersionStore for MemoryRepository {
    async fn record_version(&self, binary: &BinaryRef, actor: &Actor) -> Result<Version> {
        let mut state = self.lock()?;
        Self::snapshot(&mut state, &binary.id, actor)
    }

    async fn versions(&self, binary_id: &str) -> Result<Vec<Version>> {
        Ok(self
            .lock()?
            .versions
            .iter()
            .filter(|v| v.version.binary_id == binary_id)
            .map(|v| v.version.clone())
            .collect())
    }
}

/// Search index that records every published document in order.
#[derive(Default)]
pub struct MemorySearchIndex {
    published: Mutex<Vec<IndexDocument>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every document published so far, in publish order.
    pub fn published(&self) -> Vec<IndexDocument> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// `(kind, id)` of every publish call, in order.
    pub fn published_ids(&self) -> Vec<(DocumentKind, String)> {
        self.published()
            .into_iter()
            .map(|d| (d.kind, d.id))
            .collect()
    }

    pub fn publish_count(&self, kind: DocumentKind, id: &str) -> usize {
        self.published()
            .iter()
            .filter(|d| d.kind == kind && d.id == id)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut p) = self.published.lock() {
            p.clear();
        }
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn publish(&self, document: IndexDocument) -> Result<()> {
        self.published
            .lock()
            .map_err(|e| CuratorError::Index(format!("Lock poisoned: {}", e)))?
            .push(document);
        Ok(())
    }
}
