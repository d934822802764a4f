//! Working store: the staging area for files in flight.
//!
//! Uploads live under `<root>/<pairtree(file set id)>/<uuid>/<name>` and
//! re-materialized binaries under `<root>/<pairtree>/<binary id>/<uuid>/<name>`.
//! The fresh UUID keeps concurrent entries from ever writing to the same path. Entries are disposable
//! caches and never a source of truth.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use curator_core::store::RepositoryStore;
use curator_core::types::BinaryRef;

use crate::error::IngestError;
use crate::source::IngestSource;

/// Name used when an input carries no usable file name.
const FALLBACK_NAME: &str = "upload";

#[derive(Debug, Clone)]
pub struct WorkingStore {
    root: PathBuf,
}

impl WorkingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` lies inside this working store.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Copy an input's bytes into a fresh, collision-free location for
    /// `file_set_id` and return the new path.
    pub fn copy_into_working_area(
        &self,
        source: &mut dyn IngestSource,
        file_set_id: &str,
    ) -> Result<PathBuf, IngestError> {
        let name = sanitize_name(source.original_filename());
        let dir = self
            .container_dir(file_set_id)
            .join(Uuid::new_v4().to_string());
        let path = dir.join(name);

        let content = source
            .read_bytes()
            .map_err(|e| IngestError::staging(&path, e))?;
        std::fs::create_dir_all(&dir).map_err(|e| IngestError::staging(&dir, e))?;

        // Write beside the target and rename so readers never see a partial file.
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| IngestError::staging(&dir, e))?;
        tmp.write_all(&content)
            .map_err(|e| IngestError::staging(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| IngestError::staging(&path, e.error))?;

        debug!(file_set = file_set_id, path = %path.display(), bytes = content.len(), "Copied into working area");
        Ok(path)
    }

    /// Materialize the binary's current bytes into a location of its own and
    /// return the path. Every call fetches from `store` and writes a fresh
    /// copy, so concurrent entries on one relation never share a file.
    pub async fn locate(
        &self,
        store: &dyn RepositoryStore,
        binary: &BinaryRef,
    ) -> Result<PathBuf, IngestError> {
        let (_, content) = store.read_binary(&binary.id).await?;
        let path = self.binary_path(binary);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| IngestError::staging(dir, e))?;
        }
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| IngestError::staging(&path, e))?;

        debug!(binary = %binary.id, path = %path.display(), bytes = content.len(), "Binary materialized into working area");
        Ok(path)
    }

    /// Best-effort delete. A missing file is not an error. Empty directories
    /// left behind are pruned up to the store root.
    pub fn remove(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Working copy removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove working copy");
                return;
            }
        }

        if !self.contains(path) {
            return;
        }
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root || std::fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }

    /// Guard that removes every registered path when dropped.
    pub fn cleanup_guard(&self) -> WorkingCopies<'_> {
        WorkingCopies {
            store: self,
            paths: Vec::new(),
        }
    }

    fn container_dir(&self, file_set_id: &str) -> PathBuf {
        let id = sanitize_segment(file_set_id);
        let mut dir = self.root.clone();
        let chars: Vec<char> = id.chars().collect();
        for pair in chars.chunks(2).take(4) {
            dir.push(pair.iter().collect::<String>());
        }
        dir.push(&id);
        dir
    }

    fn binary_path(&self, binary: &BinaryRef) -> PathBuf {
        let segment = binary.id.rsplit('/').next().unwrap_or(&binary.id);
        self.container_dir(&binary.container_id)
            .join(sanitize_segment(segment))
            .join(Uuid::new_v4().to_string())
            .join(sanitize_name(Some(&binary.original_name)))
    }
}

/// Paths to delete when the owning pipeline entry finishes, on every exit path.
pub struct WorkingCopies<'a> {
    store: &'a WorkingStore,
    paths: Vec<PathBuf>,
}

impl WorkingCopies<'_> {
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Keep every registered path; nothing is removed on drop.
    pub fn keep(mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
    }
}

impl Drop for WorkingCopies<'_> {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            self.store.remove(&path);
        }
    }
}

fn sanitize_segment(raw: &str) -> String {
    let s: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() {
        "_".to_string()
    } else {
        s
    }
}

fn sanitize_name(raw: Option<&str>) -> String {
    let base = raw
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .map(str::trim)
        .unwrap_or("");
    if base.is_empty() || base == "." || base == ".." {
        FALLBACK_NAME.to_string()
    } else {
        base.to_string()
    }
}
