//! Reindex cascade: republish a file set and the ancestors affected by a
//! mutation. Lineage is materialized once per entry by the caller.

use std::sync::Arc;

use tracing::debug;

use curator_core::error::Result;
use curator_core::store::SearchIndex;
use curator_core::types::{DocumentKind, FileSet, IndexDocument, Lineage};

pub struct ReindexCascade {
    index: Arc<dyn SearchIndex>,
}

impl ReindexCascade {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    /// After characterization: the file set itself plus every collection
    /// its parent work belongs to. Collections are reindexed, never derived.
    ///
    /// Returns the number of documents published.
    pub async fn after_characterize(&self, file_set: &FileSet, lineage: &Lineage) -> Result<usize> {
        self.index.publish(IndexDocument::for_file_set(file_set)).await?;
        let mut published = 1;
        for collection_id in lineage.collection_ids() {
            self.index
                .publish(IndexDocument::reference(DocumentKind::Collection, collection_id))
                .await?;
            published += 1;
        }
        debug!(file_set = %file_set.id, published, "Characterize cascade published");
        Ok(published)
    }

    /// After derivation: the file set itself, plus the parent work only when
    /// this file set is the work's representative thumbnail.
    pub async fn after_derive(&self, file_set: &FileSet, lineage: &Lineage) -> Result<usize> {
        self.index.publish(IndexDocument::for_file_set(file_set)).await?;
        let mut published = 1;
        if lineage.is_thumbnail_of_parent(&file_set.id) {
            if let Some(parent) = &lineage.parent {
                self.index
                    .publish(IndexDocument::reference(DocumentKind::Work, &parent.id))
                    .await?;
                published += 1;
            }
        }
        debug!(file_set = %file_set.id, published, "Derive cascade published");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_core::types::ParentWork;
    use curator_storage::MemorySearchIndex;

    fn lineage(thumbnail: Option<&str>, collections: &[&str]) -> Lineage {
        Lineage {
            parent: Some(ParentWork {
                id: "w1".to_string(),
                thumbnail_id: thumbnail.map(str::to_string),
                collection_ids: collections.iter().map(|c| c.to_string()).collect(),
            }),
        }
    }

    fn cascade() -> (ReindexCascade, Arc<MemorySearchIndex>) {
        let index = Arc::new(MemorySearchIndex::new());
        (ReindexCascade::new(index.clone()), index)
    }

    #[tokio::test]
    async fn test_characterize_publishes_self_and_collections() {
        let (cascade, index) = cascade();
        let fs = FileSet::new("fs1").with_parent("w1");
        let n = cascade
            .after_characterize(&fs, &lineage(None, &["c1", "c2"]))
            .await
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(
            index.published_ids(),
            vec![
                (DocumentKind::FileSet, "fs1".to_string()),
                (DocumentKind::Collection, "c1".to_string()),
                (DocumentKind::Collection, "c2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_characterize_orphan_publishes_self_only() {
        let (cascade, index) = cascade();
        let n = cascade
            .after_characterize(&FileSet::new("fs1"), &Lineage::orphan())
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(index.published().len(), 1);
    }

    #[tokio::test]
    async fn test_derive_publishes_parent_only_for_thumbnail() {
        let (cascade, index) = cascade();
        let fs = FileSet::new("fs1").with_parent("w1");

        let n = cascade
            .after_derive(&fs, &lineage(Some("fs2"), &["c1"]))
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            index.published_ids(),
            vec![(DocumentKind::FileSet, "fs1".to_string())]
        );

        index.clear();
        let n = cascade
            .after_derive(&fs, &lineage(Some("fs1"), &["c1"]))
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            index.published_ids(),
            vec![
                (DocumentKind::FileSet, "fs1".to_string()),
                (DocumentKind::Work, "w1".to_string()),
            ]
        );
    }
}
