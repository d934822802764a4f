//! SQLite-backed search index.
//!
//! Documents are upserted by `(kind, id)`. Reference documents published for
//! ancestors carry no fields and only bump the publish counter, keeping any
//! fields a fuller publish stored earlier.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use curator_core::error::{CuratorError, Result};
use curator_core::store::SearchIndex;
use curator_core::types::{DocumentKind, IndexDocument};

use crate::db::Database;

/// A stored index document plus its publish bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub document: IndexDocument,
    pub publish_count: u64,
}

#[derive(Debug, Clone)]
pub struct SqliteSearchIndex {
    db: Arc<Database>,
}

impl SqliteSearchIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fetch a document by kind and id.
    pub fn get(&self, kind: DocumentKind, id: &str) -> Result<Option<IndexedDocument>> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT fields, publish_count FROM index_documents WHERE kind = ?1 AND id = ?2",
                    params![kind.to_string(), id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
                .map_err(|e| CuratorError::Index(e.to_string()))?;

            match row {
                Some((fields, count)) => Ok(Some(IndexedDocument {
                    document: IndexDocument {
                        id: id.to_string(),
                        kind,
                        fields: serde_json::from_str(&fields)?,
                    },
                    publish_count: count as u64,
                })),
                None => Ok(None),
            }
        })
    }
}

#[async_trait]
impl SearchIndex for SqliteSearchIndex {
    async fn publish(&self, document: IndexDocument) -> Result<()> {
        let fields = serde_json::to_string(&document.fields)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO index_documents (kind, id, fields, published_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(kind, id) DO UPDATE SET
                    fields = CASE WHEN excluded.fields = 'null'
                             THEN index_documents.fields ELSE excluded.fields END,
                    publish_count = index_documents.publish_count + 1,
                    published_at = excluded.published_at",
                params![
                    document.kind.to_string(),
                    document.id,
                    fields,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| CuratorError::Index(format!("Failed to publish {}: {}", document.id, e)))?;
            Ok(())
        })?;
        debug!(kind = %document.kind, id = %document.id, "Index document published");
        Ok(())
    }
}
