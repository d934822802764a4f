//! CLI argument definitions for the Curator application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use curator_core::types::ORIGINAL_FILE;

/// Curator: attach files to file sets, version them, characterize and derive.
#[derive(Parser, Debug)]
#[command(name = "curator", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Keep everything in memory instead of the SQLite database.
    #[arg(long = "in-memory", global = true)]
    pub in_memory: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attach files to a file set and run the ingest pipeline.
    Ingest {
        /// Files to ingest, as `PATH` or `RELATION=PATH`.
        #[arg(required = true)]
        files: Vec<String>,

        #[arg(long = "file-set")]
        file_set: String,

        /// Acting user recorded on new versions.
        #[arg(long)]
        user: String,

        /// Relation for files given without one.
        #[arg(long, default_value = ORIGINAL_FILE)]
        relation: String,

        /// Declared MIME type for every file.
        #[arg(long)]
        mime: Option<String>,

        /// Work the file set belongs to, when it has to be created.
        #[arg(long)]
        parent: Option<String>,
    },

    /// Restore a relation to an earlier version.
    Revert {
        #[arg(long = "file-set")]
        file_set: String,

        #[arg(long)]
        relation: String,

        /// Version id as listed by `versions`.
        #[arg(long)]
        version: String,

        #[arg(long)]
        user: String,
    },

    /// List the versions of a relation's binary.
    Versions {
        #[arg(long = "file-set")]
        file_set: String,

        #[arg(long, default_value = ORIGINAL_FILE)]
        relation: String,
    },

    /// Register a work with its thumbnail and collection memberships.
    RegisterWork {
        #[arg(long)]
        id: String,

        /// File set that represents the work.
        #[arg(long)]
        thumbnail: Option<String>,

        #[arg(long = "collection")]
        collections: Vec<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CURATOR_CONFIG env var > platform default (~/.curator/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CURATOR_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }
}

/// Split a `RELATION=PATH` argument. Plain paths get `default_relation`.
pub fn parse_file_arg(arg: &str, default_relation: &str) -> (String, PathBuf) {
    match arg.split_once('=') {
        Some((relation, path))
            if !relation.is_empty() && !relation.contains(['/', '\\']) && !path.is_empty() =>
        {
            (relation.to_string(), PathBuf::from(path))
        }
        _ => (default_relation.to_string(), PathBuf::from(arg)),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".curator").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}
