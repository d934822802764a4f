use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Well-known relation names
// =============================================================================

/// Relation used when an ingest request does not name one.
pub const ORIGINAL_FILE: &str = "original_file";
/// Relation conventionally used for restored preservation copies.
pub const RESTORED_FILE: &str = "restored_file";
/// Derivative relation holding the thumbnail rendition.
pub const THUMBNAIL: &str = "thumbnail";
/// Derivative relation holding plain text extracted from the original.
pub const EXTRACTED_TEXT: &str = "extracted_text";

// =============================================================================
// Content containers
// =============================================================================

/// A binary resource occupying a named relation on a container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRef {
    /// Stable identifier of the binary; survives content replacement.
    pub id: String,
    /// Identifier of the owning container.
    pub container_id: String,
    /// Relation the binary occupies, e.g. `original_file`.
    pub relation: String,
    pub mime_type: Option<String>,
    pub original_name: String,
    pub size: u64,
}

/// A named slot on a [`FileSet`] pointing at one binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRelation {
    pub name: String,
    pub binary: BinaryRef,
}

/// Technical metadata extracted from a binary during characterization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalMetadata {
    pub mime_type: Option<String>,
    /// Human readable format label, e.g. "JPEG image".
    pub format_label: Option<String>,
    pub file_size: Option<u64>,
    /// SHA-256 of the characterized bytes, lowercase hex.
    pub checksum: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
    pub original_name: Option<String>,
    pub characterized_at: Option<DateTime<Utc>>,
}

impl TechnicalMetadata {
    /// True once characterization has populated the bag.
    pub fn is_characterized(&self) -> bool {
        self.characterized_at.is_some()
    }
}

/// The content container ("file set") owning one or more file relations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileSet {
    pub id: String,
    /// Work that contains this file set, if any.
    pub parent_id: Option<String>,
    #[serde(default)]
    pub characteristics: TechnicalMetadata,
    #[serde(default)]
    pub relations: BTreeMap<String, FileRelation>,
}

impl FileSet {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            characteristics: TechnicalMetadata::default(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// The binary currently attached under `relation`.
    pub fn binary(&self, relation: &str) -> Option<&BinaryRef> {
        self.relations.get(relation).map(|r| &r.binary)
    }

    /// Effective content type: characterized type first, then the declared
    /// type of the original file.
    pub fn mime_type(&self) -> Option<&str> {
        self.characteristics.mime_type.as_deref().or_else(|| {
            self.binary(ORIGINAL_FILE)
                .and_then(|b| b.mime_type.as_deref())
        })
    }

    pub fn is_video(&self) -> bool {
        self.mime_type().is_some_and(|m| m.starts_with("video/"))
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type().is_some_and(|m| m.starts_with("audio/"))
    }
}

// =============================================================================
// Lineage
// =============================================================================

/// The work a file set belongs to, materialized once per pipeline entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentWork {
    pub id: String,
    /// File set designated as the work's representative thumbnail.
    pub thumbnail_id: Option<String>,
    /// Collections the work is a member of.
    pub collection_ids: Vec<String>,
}

/// Ancestors of a file set that may need reindexing after a mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub parent: Option<ParentWork>,
}

impl Lineage {
    pub fn orphan() -> Self {
        Self::default()
    }

    /// Whether `file_set_id` is the parent work's representative thumbnail.
    pub fn is_thumbnail_of_parent(&self, file_set_id: &str) -> bool {
        self.parent
            .as_ref()
            .and_then(|p| p.thumbnail_id.as_deref())
            .is_some_and(|t| t == file_set_id)
    }

    pub fn collection_ids(&self) -> &[String] {
        self.parent
            .as_ref()
            .map(|p| p.collection_ids.as_slice())
            .unwrap_or(&[])
    }
}

// =============================================================================
// Versions
// =============================================================================

/// The user recorded as the agent of a change.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(pub String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of a binary's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub binary_id: String,
    pub relation: String,
    /// Sequential label, `version1`, `version2`, ...
    pub label: String,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Attachment input
// =============================================================================

/// Bytes handed to the repository store together with decorating metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingFile {
    pub content: Vec<u8>,
    pub mime_type: Option<String>,
    pub original_name: String,
}

/// Options for [`crate::store::RepositoryStore::attach`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachOptions {
    /// When false the store must not mint a version on its own.
    pub versioning: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self { versioning: true }
    }
}

// =============================================================================
// Ingestion requests and jobs
// =============================================================================

/// Per-entry attachment options captured by the actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default = "default_relation")]
    pub relation: String,
}

fn default_relation() -> String {
    ORIGINAL_FILE.to_string()
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            mime_type: None,
            filename: None,
            relation: default_relation(),
        }
    }
}

/// One file to attach to one container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEntry {
    pub file_set_id: String,
    pub user: Actor,
    /// Stable on-disk path of the staged bytes.
    pub working_file: PathBuf,
    pub options: IngestOptions,
}

/// Ordered unit of work consumed once by the ingest orchestrator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRequest {
    pub entries: Vec<IngestEntry>,
}

impl IngestionRequest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Payloads carried by the asynchronous execution subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Attach, version, characterize, derive and reindex each entry.
    IngestFile(IngestionRequest),
    /// Re-characterize a relation's current binary; no derivatives.
    Characterize {
        file_set_id: String,
        relation: String,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::IngestFile(_) => "ingest_file",
            Job::Characterize { .. } => "characterize",
        }
    }
}

// =============================================================================
// Index documents
// =============================================================================

/// What kind of object an index document describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    FileSet,
    Work,
    Collection,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentKind::FileSet => "file_set",
            DocumentKind::Work => "work",
            DocumentKind::Collection => "collection",
        };
        f.write_str(s)
    }
}

/// A search document handed to [`crate::store::SearchIndex::publish`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub kind: DocumentKind,
    pub fields: serde_json::Value,
}

impl IndexDocument {
    /// Full document for a file set.
    pub fn for_file_set(file_set: &FileSet) -> Self {
        let relations: Vec<&str> = file_set.relations.keys().map(String::as_str).collect();
        let c = &file_set.characteristics;
        Self {
            id: file_set.id.clone(),
            kind: DocumentKind::FileSet,
            fields: serde_json::json!({
                "parent_id": file_set.parent_id,
                "relations": relations,
                "mime_type": file_set.mime_type(),
                "format_label": c.format_label,
                "file_size": c.file_size,
                "checksum": c.checksum,
                "width": c.width,
                "height": c.height,
                "duration_ms": c.duration_ms,
                "original_name": c.original_name,
                "has_thumbnail": file_set.relations.contains_key(THUMBNAIL),
                "has_extracted_text": file_set.relations.contains_key(EXTRACTED_TEXT),
            }),
        }
    }

    /// Reference document for an ancestor; the index resolves the rest.
    pub fn reference(kind: DocumentKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            fields: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(relation: &str, mime: Option<&str>) -> BinaryRef {
        BinaryRef {
            id: format!("fs1/files/{}", relation),
            container_id: "fs1".to_string(),
            relation: relation.to_string(),
            mime_type: mime.map(str::to_string),
            original_name: "a.bin".to_string(),
            size: 3,
        }
    }

    #[test]
    fn test_ingest_options_default_relation() {
        let opts: IngestOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.relation, ORIGINAL_FILE);
        assert_eq!(IngestOptions::default().relation, ORIGINAL_FILE);
    }

    #[test]
    fn test_mime_type_prefers_characterized() {
        let mut fs = FileSet::new("fs1");
        fs.relations.insert(
            ORIGINAL_FILE.to_string(),
            FileRelation {
                name: ORIGINAL_FILE.to_string(),
                binary: binary(ORIGINAL_FILE, Some("application/octet-stream")),
            },
        );
        assert_eq!(fs.mime_type(), Some("application/octet-stream"));

        fs.characteristics.mime_type = Some("video/mp4".to_string());
        assert_eq!(fs.mime_type(), Some("video/mp4"));
        assert!(fs.is_video());
        assert!(!fs.is_audio());
    }

    #[test]
    fn test_lineage_thumbnail_designation() {
        let lineage = Lineage {
            parent: Some(ParentWork {
                id: "w1".to_string(),
                thumbnail_id: Some("fs1".to_string()),
                collection_ids: vec!["c1".to_string(), "c2".to_string()],
            }),
        };
        assert!(lineage.is_thumbnail_of_parent("fs1"));
        assert!(!lineage.is_thumbnail_of_parent("fs2"));
        assert_eq!(lineage.collection_ids().len(), 2);

        let orphan = Lineage::orphan();
        assert!(!orphan.is_thumbnail_of_parent("fs1"));
        assert!(orphan.collection_ids().is_empty());
    }

    #[test]
    fn test_job_serialization_tagged() {
        let job = Job::Characterize {
            file_set_id: "fs1".to_string(),
            relation: ORIGINAL_FILE.to_string(),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["job"], "characterize");
        assert_eq!(job.kind(), "characterize");
    }

    #[test]
    fn test_file_set_document_fields() {
        let mut fs = FileSet::new("fs1").with_parent("w1");
        fs.characteristics.width = Some(640);
        let doc = IndexDocument::for_file_set(&fs);
        assert_eq!(doc.kind, DocumentKind::FileSet);
        assert_eq!(doc.fields["parent_id"], "w1");
        assert_eq!(doc.fields["width"], 640);
        assert_eq!(doc.fields["has_thumbnail"], false);
    }
}
