//! Ingest pipeline for Curator.
//!
//! The [`FileActor`] stages uploaded files and enqueues them; a [`Worker`]
//! takes each job off its lane and hands it to the [`IngestOrchestrator`],
//! which attaches, versions, characterizes and derives every entry and keeps
//! the search index in step through the [`ReindexCascade`].

pub mod actor;
pub mod characterize;
pub mod derivatives;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod reindex;
pub mod source;
pub mod worker;
pub mod working_store;

pub use actor::{Collaborators, FileActor};
pub use characterize::{Characterizer, FileCharacterizer};
pub use derivatives::{
    DerivativeGenerator, DerivativeRecipe, DerivativeReport, ExtractedTextRecipe, RecipeGenerator,
    Rendition, ThumbnailRecipe, TranscodeRecipe,
};
pub use error::{CharacterizationError, DerivativeError, IngestError};
pub use orchestrator::{EntryOutcome, EntryStatus, IngestOrchestrator, IngestReport};
pub use queue::{Envelope, JobQueue, LaneQueue};
pub use reindex::ReindexCascade;
pub use source::{IngestSource, LocalFile, StreamSource, UploadedFile};
pub use worker::{JobHandler, Worker, WorkerStats};
pub use working_store::{WorkingCopies, WorkingStore};
