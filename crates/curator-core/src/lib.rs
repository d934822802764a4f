pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::CuratorConfig;
pub use error::{CuratorError, Result};
pub use store::{RepositoryStore, SearchIndex, VersionStore};
pub use types::*;
