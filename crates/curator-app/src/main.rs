//! Curator application binary - composition root.
//!
//! Ties the Curator crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open storage (SQLite, or in-memory with `--in-memory`)
//! 3. Build the ingest orchestrator, lane queue and worker
//! 4. Run one subcommand, submitting through the file actor
//! 5. Drain the ingest lane before exiting

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use curator_core::config::CuratorConfig;
use curator_core::error::CuratorError;
use curator_core::store::{RepositoryStore, SearchIndex, VersionStore};
use curator_core::types::{Actor, FileSet, ParentWork};
use curator_ingest::{
    Collaborators, FileActor, FileCharacterizer, IngestOrchestrator, IngestSource, LaneQueue,
    LocalFile, RecipeGenerator, Worker, WorkingStore,
};
use curator_storage::{
    Database, MemoryRepository, MemorySearchIndex, SqliteRepository, SqliteSearchIndex,
};

use cli::{expand_home, parse_file_arg, CliArgs, Command};

/// Repository, version store and search index behind one of the two storage
/// modes.
enum Backend {
    Sqlite(Arc<SqliteRepository>, Arc<SqliteSearchIndex>),
    Memory(Arc<MemoryRepository>, Arc<MemorySearchIndex>),
}

impl Backend {
    fn open(config: &CuratorConfig, in_memory: bool) -> Result<Self, CuratorError> {
        if in_memory {
            tracing::info!("Using in-memory storage");
            return Ok(Backend::Memory(
                Arc::new(MemoryRepository::new()),
                Arc::new(MemorySearchIndex::new()),
            ));
        }
        let db_path = expand_home(&config.storage.database_path);
        let db = Arc::new(Database::new(&db_path)?);
        tracing::info!(path = %db_path.display(), "SQLite database opened");
        Ok(Backend::Sqlite(
            Arc::new(SqliteRepository::new(Arc::clone(&db))),
            Arc::new(SqliteSearchIndex::new(db)),
        ))
    }

    fn store(&self) -> Arc<dyn RepositoryStore> {
        match self {
            Backend::Sqlite(repo, _) => repo.clone(),
            Backend::Memory(repo, _) => repo.clone(),
        }
    }

    fn versions(&self) -> Arc<dyn VersionStore> {
        match self {
            Backend::Sqlite(repo, _) => repo.clone(),
            Backend::Memory(repo, _) => repo.clone(),
        }
    }

    fn index(&self) -> Arc<dyn SearchIndex> {
        match self {
            Backend::Sqlite(_, index) => index.clone(),
            Backend::Memory(_, index) => index.clone(),
        }
    }

    /// Find the file set, creating it under `parent` when it does not exist.
    async fn ensure_file_set(
        &self,
        id: &str,
        parent: Option<&str>,
    ) -> Result<FileSet, CuratorError> {
        match self.store().find(id).await {
            Ok(file_set) => Ok(file_set),
            Err(CuratorError::NotFound(_)) => {
                tracing::info!(file_set = id, parent = ?parent, "Creating file set");
                match self {
                    Backend::Sqlite(repo, _) => repo.create_file_set(id, parent),
                    Backend::Memory(repo, _) => {
                        let mut file_set = FileSet::new(id);
                        file_set.parent_id = parent.map(str::to_string);
                        repo.insert_file_set(file_set.clone())?;
                        Ok(file_set)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    fn register_work(&self, work: ParentWork) -> Result<(), CuratorError> {
        match self {
            Backend::Sqlite(repo, _) => repo.register_work(&work),
            Backend::Memory(repo, _) => repo.register_work(work),
        }
    }
}

/// Everything a subcommand needs to submit work and run it.
struct Pipeline {
    backend: Backend,
    collaborators: Collaborators,
    worker: Worker,
}

impl Pipeline {
    fn build(config: &CuratorConfig, backend: Backend) -> Result<Self, Box<dyn std::error::Error>> {
        let working = WorkingStore::new(expand_home(&config.ingest.working_path));
        std::fs::create_dir_all(working.root())?;

        let store = backend.store();
        let generator = RecipeGenerator::with_defaults(Arc::clone(&store), &config.derivatives);
        let orchestrator = Arc::new(IngestOrchestrator::new(
            Arc::clone(&store),
            backend.versions(),
            backend.index(),
            Arc::new(FileCharacterizer),
            Arc::new(generator),
            working.clone(),
            config.ingest.clone(),
        ));

        let queue = Arc::new(LaneQueue::new());
        let worker = Worker::new(
            Arc::clone(&queue),
            config.ingest.queue_name.clone(),
            orchestrator,
            config.ingest.max_attempts,
        )?;
        let collaborators = Collaborators {
            store,
            versions: backend.versions(),
            queue,
            working,
            config: config.ingest.clone(),
        };
        Ok(Self {
            backend,
            collaborators,
            worker,
        })
    }

    fn actor(&self, file_set_id: &str, user: &str) -> FileActor {
        FileActor::new(file_set_id, Actor::new(user), self.collaborators.clone())
    }

    async fn drain(&self) {
        let stats = self.worker.drain().await;
        tracing::info!(
            lane = self.worker.lane(),
            completed = stats.completed,
            redelivered = stats.redelivered,
            abandoned = stats.abandoned,
            "Lane drained"
        );
    }
}

async fn run(args: CliArgs, config: CuratorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = expand_home(&PathBuf::from(&config.general.data_dir));
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let backend = Backend::open(&config, args.in_memory)?;
    let pipeline = Pipeline::build(&config, backend)?;

    match args.command {
        Command::Ingest {
            files,
            file_set,
            user,
            relation,
            mime,
            parent,
        } => {
            pipeline
                .backend
                .ensure_file_set(&file_set, parent.as_deref())
                .await?;

            let mut file_data: Vec<(String, Box<dyn IngestSource>)> = Vec::new();
            for arg in &files {
                let (rel, path) = parse_file_arg(arg, &relation);
                if !path.is_file() {
                    return Err(format!("Not a file: {}", path.display()).into());
                }
                let mut local = LocalFile::new(path);
                if let Some(ref m) = mime {
                    local = local.with_content_type(m.clone());
                }
                file_data.push((rel, Box::new(local)));
            }

            pipeline.actor(&file_set, &user).submit(file_data)?;
            pipeline.drain().await;

            let stored = pipeline.backend.store().find(&file_set).await?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        Command::Revert {
            file_set,
            relation,
            version,
            user,
        } => {
            let restored = pipeline
                .actor(&file_set, &user)
                .revert_to(&relation, &version)
                .await?;
            if !restored {
                return Err(format!("Failed to persist {} after restore", file_set).into());
            }
            pipeline.drain().await;
            println!("Restored {} on {} to {}", relation, file_set, version);
        }
        Command::Versions { file_set, relation } => {
            let found = pipeline.backend.store().find(&file_set).await?;
            let binary = found.binary(&relation).ok_or_else(|| {
                CuratorError::NotFound(format!("relation {} on file set {}", relation, file_set))
            })?;
            let versions = pipeline.backend.versions().versions(&binary.id).await?;
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
        Command::RegisterWork {
            id,
            thumbnail,
            collections,
        } => {
            pipeline.backend.register_work(ParentWork {
                id: id.clone(),
                thumbnail_id: thumbnail,
                collection_ids: collections,
            })?;
            println!("Registered work {}", id);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = CuratorConfig::load_or_default(&config_file);

    // Tracing. --log-level > RUST_LOG > config.
    let filter = match args.log_level.as_deref() {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting Curator v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    run(args, config).await
}
