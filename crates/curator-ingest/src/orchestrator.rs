//! Ingest orchestrator.
//!
//! Runs every entry of an [`IngestionRequest`] in order through a fixed
//! sequence of steps:
//!
//! 1. Attach the staged file (no auto-versioning) and persist.
//! 2. Resolve the attached binary to a local path through the working store.
//! 3. Record a version attributed to the acting user.
//! 4. Characterize, persist, publish the file set and its collections.
//! 5. Derive, reload, publish the file set and, if it is the parent's
//!    thumbnail, the parent work. Skipped for audio and video while
//!    transcoding is disabled.
//! 6. Remove working copies, whatever happened above.
//!
//! A failed entry is reported and logged; the next entry still runs. The
//! orchestrator never retries. Redelivery belongs to the worker, and ingest
//! jobs are never redelivered because a failed entry's staged copy has
//! already been removed by the time the job returns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use curator_core::config::IngestConfig;
use curator_core::store::{RepositoryStore, SearchIndex, VersionStore};
use curator_core::types::{
    AttachOptions, BinaryRef, FileSet, IncomingFile, IngestEntry, IngestionRequest, Job, Lineage,
    Version,
};

use crate::characterize::Characterizer;
use crate::derivatives::{DerivativeGenerator, DerivativeReport};
use crate::error::IngestError;
use crate::reindex::ReindexCascade;
use crate::worker::JobHandler;
use crate::working_store::{WorkingCopies, WorkingStore};

/// How one entry ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Completed {
        version: Version,
        derivatives: DerivativeReport,
        derivatives_skipped: bool,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub file_set_id: String,
    pub relation: String,
    pub status: EntryStatus,
}

/// Per-entry results of one request, in entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub outcomes: Vec<EntryOutcome>,
}

impl IngestReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, EntryStatus::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

pub struct IngestOrchestrator {
    store: Arc<dyn RepositoryStore>,
    versions: Arc<dyn VersionStore>,
    characterizer: Arc<dyn Characterizer>,
    derivatives: Arc<dyn DerivativeGenerator>,
    cascade: ReindexCascade,
    working: WorkingStore,
    config: IngestConfig,
}

impl IngestOrchestrator {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        versions: Arc<dyn VersionStore>,
        index: Arc<dyn SearchIndex>,
        characterizer: Arc<dyn Characterizer>,
        derivatives: Arc<dyn DerivativeGenerator>,
        working: WorkingStore,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            versions,
            characterizer,
            derivatives,
            cascade: ReindexCascade::new(index),
            working,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run every entry of `request` to completion, one after another.
    pub async fn perform(&self, request: &IngestionRequest) -> IngestReport {
        info!(entries = request.len(), "Ingest request started");
        let mut report = IngestReport::default();
        for entry in &request.entries {
            let status = self.ingest_entry(entry).await;
            report.outcomes.push(EntryOutcome {
                file_set_id: entry.file_set_id.clone(),
                relation: entry.options.relation.clone(),
                status,
            });
        }
        info!(
            completed = report.completed(),
            failed = report.failed(),
            "Ingest request finished"
        );
        report
    }

    /// Re-characterize the current binary of `relation`. Used after a revert;
    /// derivatives are left alone.
    #[instrument(skip(self))]
    pub async fn characterize_job(&self, file_set_id: &str, relation: &str) -> Result<(), IngestError> {
        let mut file_set = self.store.find(file_set_id).await?;
        let binary = file_set.binary(relation).cloned().ok_or_else(|| {
            IngestError::NotFound(format!("relation {} on file set {}", relation, file_set_id))
        })?;

        let mut cleanup = self.working.cleanup_guard();
        let path = self.working.locate(self.store.as_ref(), &binary).await?;
        cleanup.register(&path);

        let lineage = self.store.lineage(&file_set.id).await?;
        self.characterize(&mut file_set, &binary, &path, &lineage)
            .await
            .inspect_err(|e| error!(error = %e, "Characterize job failed"))
    }

    /// Whether derivation is skipped for this file set's content type.
    pub fn skips_derivatives(&self, file_set: &FileSet) -> bool {
        (file_set.is_video() || file_set.is_audio()) && !self.config.enable_transcode
    }

    async fn ingest_entry(&self, entry: &IngestEntry) -> EntryStatus {
        let mut cleanup = self.working.cleanup_guard();
        // Caller-owned durable files are never deleted.
        if self.working.contains(&entry.working_file) {
            cleanup.register(&entry.working_file);
        }

        match self.run_entry(entry, &mut cleanup).await {
            Ok(status) => status,
            Err(e) => {
                error!(
                    file_set = %entry.file_set_id,
                    relation = %entry.options.relation,
                    user = %entry.user,
                    error = %e,
                    "Ingest entry failed"
                );
                EntryStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_entry(
        &self,
        entry: &IngestEntry,
        cleanup: &mut WorkingCopies<'_>,
    ) -> Result<EntryStatus, IngestError> {
        let mut file_set = self.store.find(&entry.file_set_id).await?;

        let binary = self.attach(&mut file_set, entry).await?;

        let path = self.working.locate(self.store.as_ref(), &binary).await?;
        cleanup.register(&path);

        let version = self.versions.record_version(&binary, &entry.user).await?;
        debug!(file_set = %file_set.id, version = %version.label, "Version recorded");

        let lineage = self.store.lineage(&file_set.id).await?;

        self.characterize(&mut file_set, &binary, &path, &lineage).await?;

        let (derivatives, derivatives_skipped) = if self.skips_derivatives(&file_set) {
            info!(
                file_set = %file_set.id,
                mime_type = ?file_set.mime_type(),
                "Transcoding disabled, derivatives skipped"
            );
            (DerivativeReport::default(), true)
        } else {
            (self.derive(&mut file_set, &path, &lineage).await?, false)
        };

        info!(
            file_set = %file_set.id,
            relation = %entry.options.relation,
            version = %version.label,
            derivatives = ?derivatives.created,
            "Ingest entry completed"
        );
        Ok(EntryStatus::Completed {
            version,
            derivatives,
            derivatives_skipped,
        })
    }

    async fn attach(
        &self,
        file_set: &mut FileSet,
        entry: &IngestEntry,
    ) -> Result<BinaryRef, IngestError> {
        let content = tokio::fs::read(&entry.working_file)
            .await
            .map_err(|e| IngestError::staging(&entry.working_file, e))?;
        let original_name = entry.options.filename.clone().unwrap_or_else(|| {
            entry
                .working_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let incoming = IncomingFile {
            content,
            mime_type: entry.options.mime_type.clone(),
            original_name,
        };

        let binary = self
            .store
            .attach(
                file_set,
                &entry.options.relation,
                incoming,
                AttachOptions { versioning: false },
            )
            .await?;
        self.store.persist(file_set).await?;
        debug!(file_set = %file_set.id, binary = %binary.id, size = binary.size, "Binary attached");
        Ok(binary)
    }

    async fn characterize(
        &self,
        file_set: &mut FileSet,
        binary: &BinaryRef,
        path: &Path,
        lineage: &Lineage,
    ) -> Result<(), IngestError> {
        self.characterizer.characterize(file_set, binary, path).await?;
        self.store.persist(file_set).await?;
        self.cascade.after_characterize(file_set, lineage).await?;
        Ok(())
    }

    async fn derive(
        &self,
        file_set: &mut FileSet,
        path: &Path,
        lineage: &Lineage,
    ) -> Result<DerivativeReport, IngestError> {
        let report = self.derivatives.create_derivatives(file_set, path).await?;
        *file_set = self.store.reload(file_set).await?;
        self.cascade.after_derive(file_set, lineage).await?;
        Ok(report)
    }
}

#[async_trait]
impl JobHandler for IngestOrchestrator {
    /// Ingest jobs isolate failures per entry and always complete; a failed
    /// characterize job is returned as an error so the worker redelivers it.
    async fn run_job(&self, job: &Job) -> Result<(), IngestError> {
        match job {
            Job::IngestFile(request) => {
                self.perform(request).await;
                Ok(())
            }
            Job::Characterize {
                file_set_id,
                relation,
            } => self.characterize_job(file_set_id, relation).await,
        }
    }
}
