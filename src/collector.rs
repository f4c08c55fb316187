//! One collection run: fetch every configured repository since the
//! watermark, store what is new, then move the watermark.
//!
//! The watermark only moves after every repository went through. A failed
//! run keeps whatever it already inserted and leaves the watermark alone, so
//! the next run re-fetches an overlapping window and dedup absorbs it.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::domain::Change;
use crate::error::{CollectError, ConfigError};
use crate::filters::FilterChain;
use crate::infra::{RepositoryEntry, Store};
use crate::sources::{AdapterRegistry, ChangeRequest, SourceAdapter, MAX_ITEMS};

/// Receives every change that was new to the store.
pub trait ChangeSink: Send + Sync {
    fn accepted(&self, change: &Change);
}

/// Sends accepted changes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ChangeSink for LogSink {
    fn accepted(&self, change: &Change) {
        info!("{}", change.summary_line());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching(usize),
    Committed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Fetching(index) => write!(f, "fetching({index})"),
            RunState::Committed => f.write_str("committed"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReport {
    pub repository: String,
    /// Candidates that reached the store (after filtering).
    pub seen: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// Watermark the run fetched from.
    pub since: Option<DateTime<Utc>>,
    /// Watermark written at the end of the run.
    pub watermark: DateTime<Utc>,
    pub repositories: Vec<RepositoryReport>,
}

impl RunReport {
    pub fn inserted(&self) -> usize {
        self.repositories.iter().map(|r| r.inserted).sum()
    }
}

/// Same checks as the start of [`Collector::run`], against a list of known
/// source types. Callers use it before connecting to sources or opening the
/// store, so a bad configuration has no effect at all.
pub fn validate(repositories: &[RepositoryEntry], source_types: &[&str]) -> Result<(), ConfigError> {
    for entry in repositories {
        let source_type = entry.source.source_type.as_str();
        if !source_types.contains(&source_type) {
            return Err(ConfigError::UnsupportedSource(source_type.to_string()));
        }
        check_entry(entry)?;
    }
    Ok(())
}

fn check_entry(entry: &RepositoryEntry) -> Result<FilterChain, ConfigError> {
    let filters = FilterChain::new(&entry.source.filters)?;
    Change::validate_metadata(&entry.metadata)?;
    Ok(filters)
}

struct PlannedRepository<'a> {
    entry: &'a RepositoryEntry,
    adapter: Arc<dyn SourceAdapter>,
    filters: FilterChain,
}

pub struct Collector {
    registry: AdapterRegistry,
    store: Arc<dyn Store>,
    sink: Box<dyn ChangeSink>,
    limit: usize,
}

impl Collector {
    pub fn new(registry: AdapterRegistry, store: Arc<dyn Store>) -> Self {
        Self {
            registry,
            store,
            sink: Box::new(LogSink),
            limit: MAX_ITEMS,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn ChangeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn run(&self, repositories: &[RepositoryEntry]) -> Result<RunReport, CollectError> {
        // Configuration problems abort before anything is fetched or stored.
        let plan = self.prepare(repositories)?;

        let since = self.store.last_check_date()?;
        info!(since = ?since, repositories = plan.len(), state = %RunState::Idle, "starting collection run");

        let mut reports = Vec::with_capacity(plan.len());
        for (index, planned) in plan.into_iter().enumerate() {
            let repository = planned.entry.source.full_name();
            debug!(state = %RunState::Fetching(index), repository = %repository, "collecting");

            match self.collect_repository(planned, since).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(state = %RunState::Failed, repository = %repository, error = %e, "run aborted, watermark kept");
                    return Err(e);
                }
            }
        }

        let watermark = self.store.updated()?;
        let report = RunReport {
            since,
            watermark,
            repositories: reports,
        };
        info!(
            state = %RunState::Committed,
            inserted = report.inserted(),
            watermark = %watermark,
            "collection run finished"
        );
        Ok(report)
    }

    fn prepare<'a>(
        &self,
        repositories: &'a [RepositoryEntry],
    ) -> Result<Vec<PlannedRepository<'a>>, ConfigError> {
        repositories
            .iter()
            .map(|entry| {
                let adapter = self.registry.resolve(&entry.source.source_type)?;
                let filters = check_entry(entry)?;
                Ok(PlannedRepository {
                    entry,
                    adapter,
                    filters,
                })
            })
            .collect()
    }

    async fn collect_repository(
        &self,
        planned: PlannedRepository<'_>,
        since: Option<DateTime<Utc>>,
    ) -> Result<RepositoryReport, CollectError> {
        let PlannedRepository {
            entry,
            adapter,
            filters,
        } = planned;

        let request = ChangeRequest::new(&entry.source.user, &entry.source.repository)
            .with_since(since)
            .with_filters(filters)
            .with_limit(self.limit);
        let repository = request.full_name();

        let mut report = RepositoryReport {
            repository: repository.clone(),
            seen: 0,
            inserted: 0,
        };

        let mut changes = adapter.get_changes(request);
        while let Some(candidate) = changes.next().await {
            let candidate = candidate.map_err(|source| CollectError::Source {
                repository: repository.clone(),
                source,
            })?;
            report.seen += 1;

            let change = candidate.merge_metadata(&entry.metadata)?;
            if self.store.add_change(&change)? {
                report.inserted += 1;
                debug!(repository = %repository, kind = %change.kind, id = %change.id, "new change");
                self.sink.accepted(&change);
            }
        }

        debug!(repository = %repository, seen = report.seen, inserted = report.inserted, "repository done");
        Ok(report)
    }
}
