pub mod config;
pub mod storage;

pub use config::{Config, ConfigManager, RepositoryEntry, SourceConfig};
pub use storage::{SqliteStore, Store};
