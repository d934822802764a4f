//! File actor: the public entry point for attaching files to a file set and
//! restoring earlier versions.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use curator_core::config::IngestConfig;
use curator_core::store::{RepositoryStore, VersionStore};
use curator_core::types::{Actor, IngestEntry, IngestOptions, IngestionRequest, Job};

use crate::error::IngestError;
use crate::queue::JobQueue;
use crate::source::IngestSource;
use crate::working_store::WorkingStore;

/// Shared services an actor works with. Cheap to clone.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RepositoryStore>,
    pub versions: Arc<dyn VersionStore>,
    pub queue: Arc<dyn JobQueue>,
    pub working: WorkingStore,
    pub config: IngestConfig,
}

/// Acts on one file set on behalf of one user.
pub struct FileActor {
    file_set_id: String,
    user: Actor,
    services: Collaborators,
}

impl FileActor {
    pub fn new(file_set_id: impl Into<String>, user: Actor, services: Collaborators) -> Self {
        Self {
            file_set_id: file_set_id.into(),
            user,
            services,
        }
    }

    pub fn file_set_id(&self) -> &str {
        &self.file_set_id
    }

    pub fn user(&self) -> &Actor {
        &self.user
    }

    /// Stage every `(relation, file)` pair and enqueue them as one ingest
    /// job. Returns as soon as the job is queued.
    ///
    /// Inputs with a durable path are referenced in place; everything else is
    /// copied into the working store. If staging or enqueueing fails, copies
    /// made by this call are removed and the error is returned.
    pub fn submit<I>(&self, file_data: I) -> Result<bool, IngestError>
    where
        I: IntoIterator<Item = (String, Box<dyn IngestSource>)>,
    {
        let working = &self.services.working;
        let mut staged = working.cleanup_guard();
        let mut request = IngestionRequest::default();

        for (relation, mut file) in file_data {
            let durable = file.durable_path().map(Path::to_path_buf);
            let working_file = match durable {
                Some(path) => path,
                None => {
                    let path = working.copy_into_working_area(file.as_mut(), &self.file_set_id)?;
                    staged.register(&path);
                    path
                }
            };
            request.entries.push(IngestEntry {
                file_set_id: self.file_set_id.clone(),
                user: self.user.clone(),
                working_file,
                options: IngestOptions {
                    mime_type: file.content_type().map(str::to_string),
                    filename: file.original_filename().map(str::to_string),
                    relation,
                },
            });
        }

        let entries = request.len();
        let lane = &self.services.config.queue_name;
        self.services.queue.enqueue(lane, Job::IngestFile(request))?;
        staged.keep();

        info!(file_set = %self.file_set_id, user = %self.user, entries, lane = %lane, "Ingest submitted");
        Ok(true)
    }

    /// Restore `relation` to the content of `version_id`, persist, record a
    /// new version and schedule re-characterization.
    ///
    /// An unknown relation or version is an error and nothing is written.
    /// A persistence failure returns `Ok(false)` and schedules nothing.
    pub async fn revert_to(&self, relation: &str, version_id: &str) -> Result<bool, IngestError> {
        let store = &self.services.store;
        let mut file_set = store.find(&self.file_set_id).await?;
        let binary = store
            .restore_version(&mut file_set, relation, version_id)
            .await?;

        if let Err(e) = store.persist(&file_set).await {
            warn!(
                file_set = %self.file_set_id,
                relation,
                version = version_id,
                error = %e,
                "Persist after restore failed"
            );
            return Ok(false);
        }

        let version = self
            .services
            .versions
            .record_version(&binary, &self.user)
            .await?;
        self.services.queue.enqueue(
            &self.services.config.queue_name,
            Job::Characterize {
                file_set_id: self.file_set_id.clone(),
                relation: relation.to_string(),
            },
        )?;

        info!(
            file_set = %self.file_set_id,
            relation,
            restored_from = version_id,
            version = %version.label,
            "Version restored"
        );
        Ok(true)
    }
}
