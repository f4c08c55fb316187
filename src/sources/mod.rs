pub mod github;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::Change;
use crate::error::{ConfigError, SourceError};
use crate::filters::FilterChain;

pub use github::GitHubAdapter;

/// Source types this build ships an adapter for.
pub const SOURCE_TYPES: &[&str] = &[github::SOURCE_TYPE];

/// Default number of items requested per sub-stream in one call.
pub const MAX_ITEMS: usize = 100;

/// Lazy, forward-only sequence of candidates. Ends after the first error.
pub type ChangeStream<'a> = BoxStream<'a, Result<Change, SourceError>>;

/// What to fetch for one (user, repository) pair.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub user: String,
    pub repository: String,
    pub since: Option<DateTime<Utc>>,
    pub filters: FilterChain,
    pub limit: usize,
}

impl ChangeRequest {
    pub fn new(user: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            repository: repository.into(),
            since: None,
            filters: FilterChain::default(),
            limit: MAX_ITEMS,
        }
    }

    pub fn with_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.user, self.repository)
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The `type` tag this adapter serves in the repository configuration.
    fn source_type(&self) -> &'static str;

    /// Changes newer than `request.since`, or the `request.limit` most recent
    /// ones when there is no watermark yet.
    fn get_changes(&self, request: ChangeRequest) -> ChangeStream<'_>;

    /// Check if the remote platform is reachable with our credentials
    async fn health_check(&self) -> Result<bool, SourceError>;
}

/// Adapters keyed by their source-type tag.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters
            .insert(adapter.source_type().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn resolve(&self, source_type: &str) -> Result<Arc<dyn SourceAdapter>, ConfigError> {
        self.adapters
            .get(source_type)
            .cloned()
            .ok_or_else(|| ConfigError::UnsupportedSource(source_type.to_string()))
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.values()
    }
}
