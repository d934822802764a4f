//! SQLite-backed repository and version store.
//!
//! File sets, their relation pointers and binary content live in the same
//! database as the append-only version history, so a version snapshot is a
//! single `INSERT ... SELECT` of the binary's current content.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use curator_core::error::{CuratorError, Result};
use curator_core::store::{RepositoryStore, VersionStore};
use curator_core::types::{
    Actor, AttachOptions, BinaryRef, FileRelation, FileSet, IncomingFile, Lineage, ParentWork,
    TechnicalMetadata, Version,
};

use crate::db::Database;

/// Actor recorded when the store mints a version on its own during attach.
const SYSTEM_ACTOR: &str = "system";

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> CuratorError + '_ {
    move |e| CuratorError::Storage(format!("{}: {}", context, e))
}

/// Repository and version store over a shared [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    db: Arc<Database>,
}

impl SqliteRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an empty file set, optionally inside a work. Existing file sets
    /// are left untouched.
    pub fn create_file_set(&self, id: &str, parent_id: Option<&str>) -> Result<FileSet> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_sets (id, parent_id) VALUES (?1, ?2)
                 ON CONFLICT(id) DO NOTHING",
                params![id, parent_id],
            )
            .map_err(storage_err("Failed to create file set"))?;
            load_file_set(conn, id)?.ok_or_else(|| CuratorError::NotFound(format!("file set {}", id)))
        })
    }

    /// Register (or update) a work's thumbnail designation and collections.
    pub fn register_work(&self, work: &ParentWork) -> Result<()> {
        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(storage_err("Failed to begin transaction"))?;
            tx.execute(
                "INSERT INTO works (id, thumbnail_id) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET thumbnail_id = excluded.thumbnail_id",
                params![work.id, work.thumbnail_id],
            )
            .map_err(storage_err("Failed to save work"))?;
            tx.execute(
                "DELETE FROM work_collections WHERE work_id = ?1",
                params![work.id],
            )
            .map_err(storage_err("Failed to clear collections"))?;
            for collection_id in &work.collection_ids {
                tx.execute(
                    "INSERT INTO work_collections (work_id, collection_id) VALUES (?1, ?2)",
                    params![work.id, collection_id],
                )
                .map_err(storage_err("Failed to save collection membership"))?;
            }
            tx.commit().map_err(storage_err("Failed to commit work"))
        })
    }

    fn next_binary_id(file_set: &FileSet, relation: &str) -> String {
        match file_set.binary(relation) {
            Some(existing) => existing.id.clone(),
            None => format!("{}/files/{}", file_set.id, Uuid::new_v4()),
        }
    }
}

fn load_file_set(conn: &Connection, id: &str) -> Result<Option<FileSet>> {
    let row = conn
        .query_row(
            "SELECT parent_id, characteristics FROM file_sets WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(storage_err("Failed to load file set"))?;

    let Some((parent_id, characteristics)) = row else {
        return Ok(None);
    };
    let characteristics: TechnicalMetadata = serde_json::from_str(&characteristics)?;

    let mut stmt = conn
        .prepare(
            "SELECT r.name, b.id, b.relation, b.mime_type, b.original_name, b.size
             FROM relations r JOIN binaries b ON b.id = r.binary_id
             WHERE r.file_set_id = ?1",
        )
        .map_err(storage_err("Failed to prepare relation query"))?;
    let rows = stmt
        .query_map(params![id], |row| {
            let name: String = row.get(0)?;
            let binary = BinaryRef {
                id: row.get(1)?,
                container_id: id.to_string(),
                relation: row.get(2)?,
                mime_type: row.get(3)?,
                original_name: row.get(4)?,
                size: row.get::<_, i64>(5)? as u64,
            };
            Ok(FileRelation { name, binary })
        })
        .map_err(storage_err("Failed to query relations"))?;

    let mut relations = BTreeMap::new();
    for row in rows {
        let relation = row.map_err(storage_err("Failed to read relation"))?;
        relations.insert(relation.name.clone(), relation);
    }

    Ok(Some(FileSet {
        id: id.to_string(),
        parent_id,
        characteristics,
        relations,
    }))
}

fn load_binary(conn: &Connection, binary_id: &str) -> Result<(BinaryRef, Vec<u8>)> {
    conn.query_row(
        "SELECT file_set_id, relation, mime_type, original_name, size, content
         FROM binaries WHERE id = ?1",
        params![binary_id],
        |row| {
            Ok((
                BinaryRef {
                    id: binary_id.to_string(),
                    container_id: row.get(0)?,
                    relation: row.get(1)?,
                    mime_type: row.get(2)?,
                    original_name: row.get(3)?,
                    size: row.get::<_, i64>(4)? as u64,
                },
                row.get::<_, Vec<u8>>(5)?,
            ))
        },
    )
    .optional()
    .map_err(storage_err("Failed to load binary"))?
    .ok_or_else(|| CuratorError::NotFound(format!("binary {}", binary_id)))
}

fn insert_version(conn: &Connection, binary: &BinaryRef, actor: &Actor) -> Result<Version> {
    let seq: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM versions WHERE binary_id = ?1",
            params![binary.id],
            |row| row.get(0),
        )
        .map_err(storage_err("Failed to compute version sequence"))?;

    let version = Version {
        id: Uuid::new_v4().to_string(),
        binary_id: binary.id.clone(),
        relation: binary.relation.clone(),
        label: format!("version{}", seq),
        actor: actor.clone(),
        created_at: Utc::now(),
    };

    let inserted = conn
        .execute(
            "INSERT INTO versions
                (id, binary_id, seq, relation, actor, mime_type, original_name, content, created_at)
             SELECT ?1, id, ?2, relation, ?3, mime_type, original_name, content, ?4
             FROM binaries WHERE id = ?5",
            params![
                version.id,
                seq,
                actor.0,
                version.created_at.to_rfc3339(),
                binary.id,
            ],
        )
        .map_err(storage_err("Failed to record version"))?;

    if inserted == 0 {
        return Err(CuratorError::NotFound(format!("binary {}", binary.id)));
    }
    Ok(version)
}

#[async_trait]
impl RepositoryStore for SqliteRepository {
    async fn find(&self, file_set_id: &str) -> Result<FileSet> {
        self.db.with_conn(|conn| {
            load_file_set(conn, file_set_id)?
                .ok_or_else(|| CuratorError::NotFound(format!("file set {}", file_set_id)))
        })
    }

    async fn attach(
        &self,
        file_set: &mut FileSet,
        relation: &str,
        file: IncomingFile,
        options: AttachOptions,
    ) -> Result<BinaryRef> {
        let binary = BinaryRef {
            id: Self::next_binary_id(file_set, relation),
            container_id: file_set.id.clone(),
            relation: relation.to_string(),
            mime_type: file.mime_type.clone(),
            original_name: file.original_name.clone(),
            size: file.content.len() as u64,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO binaries (id, file_set_id, relation, mime_type, original_name, size, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    mime_type = excluded.mime_type,
                    original_name = excluded.original_name,
                    size = excluded.size,
                    content = excluded.content,
                    updated_at = strftime('%s', 'now')",
                params![
                    binary.id,
                    binary.container_id,
                    binary.relation,
                    binary.mime_type,
                    binary.original_name,
                    binary.size as i64,
                    file.content,
                ],
            )
            .map_err(storage_err("Failed to write binary"))?;
            if options.versioning {
                insert_version(conn, &binary, &Actor::new(SYSTEM_ACTOR))?;
            }
            Ok(())
        })?;

        debug!(file_set = %file_set.id, relation, binary = %binary.id, "Binary attached");
        file_set.relations.insert(
            relation.to_string(),
            FileRelation {
                name: relation.to_string(),
                binary: binary.clone(),
            },
        );
        Ok(binary)
    }

    async fn persist(&self, file_set: &FileSet) -> Result<()> {
        let characteristics = serde_json::to_string(&file_set.characteristics)?;
        let persistence_err =
            |e: rusqlite::Error| CuratorError::Persistence(format!("file set {}: {}", file_set.id, e));

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(persistence_err)?;
            tx.execute(
                "INSERT INTO file_sets (id, parent_id, characteristics) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    parent_id = excluded.parent_id,
                    characteristics = excluded.characteristics,
                    updated_at = strftime('%s', 'now')",
                params![file_set.id, file_set.parent_id, characteristics],
            )
            .map_err(persistence_err)?;
            tx.execute(
                "DELETE FROM relations WHERE file_set_id = ?1",
                params![file_set.id],
            )
            .map_err(persistence_err)?;
            for (name, relation) in &file_set.relations {
                tx.execute(
                    "INSERT INTO relations (file_set_id, name, binary_id) VALUES (?1, ?2, ?3)",
                    params![file_set.id, name, relation.binary.id],
                )
                .map_err(persistence_err)?;
            }
            tx.commit().map_err(persistence_err)
        })
    }

    async fn restore_version(
        &self,
        file_set: &mut FileSet,
        relation: &str,
        version_id: &str,
    ) -> Result<BinaryRef> {
        let current = file_set.binary(relation).cloned().ok_or_else(|| {
            CuratorError::NotFound(format!("relation {} on file set {}", relation, file_set.id))
        })?;

        let restored = self.db.with_conn(|conn| {
            let snapshot = conn
                .query_row(
                    "SELECT mime_type, original_name, content FROM versions
                     WHERE id = ?1 AND binary_id = ?2",
                    params![version_id, current.id],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(storage_err("Failed to load version"))?;
            let (mime_type, original_name, content) = snapshot.ok_or_else(|| {
                CuratorError::NotFound(format!("version {} of {}", version_id, current.id))
            })?;

            conn.execute(
                "UPDATE binaries SET mime_type = ?1, original_name = ?2, size = ?3,
                    content = ?4, updated_at = strftime('%s', 'now')
                 WHERE id = ?5",
                params![
                    mime_type,
                    original_name,
                    content.len() as i64,
                    content,
                    current.id
                ],
            )
            .map_err(storage_err("Failed to restore binary"))?;

            Ok(BinaryRef {
                mime_type,
                original_name,
                size: content.len() as u64,
                ..current.clone()
            })
        })?;

        file_set.relations.insert(
            relation.to_string(),
            FileRelation {
                name: relation.to_string(),
                binary: restored.clone(),
            },
        );
        Ok(restored)
    }

    async fn read_binary(&self, binary_id: &str) -> Result<(BinaryRef, Vec<u8>)> {
        self.db.with_conn(|conn| load_binary(conn, binary_id))
    }

    async fn lineage(&self, file_set_id: &str) -> Result<Lineage> {
        self.db.with_conn(|conn| {
            let parent_id: Option<String> = conn
                .query_row(
                    "SELECT parent_id FROM file_sets WHERE id = ?1",
                    params![file_set_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to load parent"))?
                .ok_or_else(|| CuratorError::NotFound(format!("file set {}", file_set_id)))?;

            let Some(parent_id) = parent_id else {
                return Ok(Lineage::orphan());
            };

            let thumbnail_id: Option<String> = conn
                .query_row(
                    "SELECT thumbnail_id FROM works WHERE id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to load work"))?
                .flatten();

            let mut stmt = conn
                .prepare(
                    "SELECT collection_id FROM work_collections
                     WHERE work_id = ?1 ORDER BY collection_id",
                )
                .map_err(storage_err("Failed to prepare collection query"))?;
            let collection_ids = stmt
                .query_map(params![parent_id], |row| row.get::<_, String>(0))
                .map_err(storage_err("Failed to query collections"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err("Failed to read collection"))?;

            Ok(Lineage {
                parent: Some(ParentWork {
                    id: parent_id,
                    thumbnail_id,
                    collection_ids,
                }),
            })
        })
    }
}

#[async_trait]
impl VersionStore for SqliteRepository {
    async fn record_version(&self, binary: &BinaryRef, actor: &Actor) -> Result<Version> {
        self.db.with_conn(|conn| insert_version(conn, binary, actor))
    }

    async fn versions(&self, binary_id: &str) -> Result<Vec<Version>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, seq, relation, actor, created_at FROM versions
                     WHERE binary_id = ?1 ORDER BY seq",
                )
                .map_err(storage_err("Failed to prepare version query"))?;
            let rows = stmt
                .query_map(params![binary_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(storage_err("Failed to query versions"))?;

            let mut versions = Vec::new();
            for row in rows {
                let (id, seq, relation, actor, created_at) =
                    row.map_err(storage_err("Failed to read version"))?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| CuratorError::Serialization(e.to_string()))?
                    .with_timezone(&Utc);
                versions.push(Version {
                    id,
                    binary_id: binary_id.to_string(),
                    relation,
                    label: format!("version{}", seq),
                    actor: Actor(actor),
                    created_at,
                });
            }
            Ok(versions)
        })
    }
}
