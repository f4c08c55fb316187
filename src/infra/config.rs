use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::Metadata;
use crate::error::ConfigError;
use crate::filters::FilterRule;
use crate::sources::MAX_ITEMS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database location; falls back to `~/.chglg/changes.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

fn default_max_items() -> usize {
    MAX_ITEMS
}

impl Config {
    pub fn uses_source(&self, source_type: &str) -> bool {
        self.repositories
            .iter()
            .any(|entry| entry.source.source_type == source_type)
    }
}

/// One tracked repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub source: SourceConfig,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: String,
    pub user: String,
    pub repository: String,
    /// Written as `- exclude_author: bot` or `- exclude_merges`.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub filters: Vec<FilterRule>,
}

impl SourceConfig {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.user, self.repository)
    }
}

pub struct ConfigManager {
    path: PathBuf,
    config: Config,
}

impl ConfigManager {
    pub const CONFIG_FILE: &'static str = "chglg.yml";
    pub const LEGACY_CONFIG_FILE: &'static str = "repositories.json";
    pub const CONFIG_ENV: &'static str = "CHGLG_CONFIG";
    pub const DATABASE_ENV: &'static str = "CHGLG_DB";

    /// Load from `explicit`, `$CHGLG_CONFIG`, `./chglg.yml` or
    /// `./repositories.json`, in that order.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(Self::CONFIG_ENV).map(PathBuf::from);
        let path = Self::resolve_path(explicit, env_path, Path::new("."))?;
        Self::from_path(path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.clone())
            } else {
                ConfigError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let config = Self::parse(&contents, &path)?;
        Ok(Self { path, config })
    }

    /// YAML, or JSON since YAML is a superset of it.
    pub fn parse(contents: &str, path: &Path) -> Result<Config, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn resolve_path(
        explicit: Option<&Path>,
        env_path: Option<PathBuf>,
        cwd: &Path,
    ) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = env_path {
            return Ok(path);
        }

        [Self::CONFIG_FILE, Self::LEGACY_CONFIG_FILE]
            .iter()
            .map(|name| cwd.join(name))
            .find(|candidate| candidate.exists())
            .ok_or_else(|| ConfigError::NotFound(cwd.join(Self::CONFIG_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    /// `explicit`, then `$CHGLG_DB`, then the config file, then the home directory.
    pub fn database_path(&self, explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let env_path = std::env::var_os(Self::DATABASE_ENV).map(PathBuf::from);
        Self::pick_database_path(explicit, env_path, self.config.database.as_deref())
    }

    pub fn pick_database_path(
        explicit: Option<&Path>,
        env_path: Option<PathBuf>,
        configured: Option<&Path>,
    ) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = env_path {
            return Ok(path);
        }
        if let Some(path) = configured {
            return Ok(path.to_path_buf());
        }

        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(home.join(".chglg").join("changes.db"))
    }

    pub fn create_default(path: impl AsRef<Path>) -> Result<bool, ConfigError> {
        let path = path.as_ref();

        if path.exists() {
            return Ok(false);
        }

        let default_content = r#"# chglg configuration
# Tracked repositories. Each new release or commit is stored once.

max_items: 100

repositories:
  - source:
      type: github
      user: rust-lang
      repository: rust
      filters:
        - exclude_author: "bors"
        - exclude_merges
    metadata:
      name: Rust
"#;

        std::fs::write(path, default_content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }
}
