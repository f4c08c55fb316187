#![allow(dead_code)]

use async_trait::async_trait;
use chglg::collector::ChangeSink;
use chglg::domain::{Change, ChangeKind, Metadata};
use chglg::error::{SourceError, StoreError};
use chglg::infra::{RepositoryEntry, SourceConfig, SqliteStore, Store};
use chglg::sources::{ChangeRequest, ChangeStream, SourceAdapter};
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FAKE_SOURCE: &str = "fake";

#[derive(Clone)]
pub enum Script {
    Changes(Vec<Change>),
    /// Yield these, then fail.
    FailAfter(Vec<Change>, fn() -> SourceError),
}

/// Scripted adapter keyed by `user/repository`, recording every request.
#[derive(Default)]
pub struct FakeAdapter {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, repository: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(repository.to_string(), script);
    }

    pub fn requests(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn source_type(&self) -> &'static str {
        FAKE_SOURCE
    }

    fn get_changes(&self, request: ChangeRequest) -> ChangeStream<'_> {
        let name = request.full_name();
        self.requests
            .lock()
            .unwrap()
            .push((name.clone(), request.since));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or(Script::Changes(Vec::new()));

        let filters = request.filters.clone();
        let keep = move |change: Change| match change.kind {
            ChangeKind::Commit => filters.apply(change),
            _ => Some(change),
        };

        let items: Vec<Result<Change, SourceError>> = match script {
            Script::Changes(changes) => changes.into_iter().filter_map(keep).map(Ok).collect(),
            Script::FailAfter(changes, make_error) => changes
                .into_iter()
                .filter_map(keep)
                .map(Ok)
                .chain(std::iter::once(Err(make_error())))
                .collect(),
        };
        futures::stream::iter(items).boxed()
    }

    async fn health_check(&self) -> Result<bool, SourceError> {
        Ok(true)
    }
}

/// In-memory store that can be told to fail writes.
pub struct FailingStore {
    inner: SqliteStore,
    fail_updated: AtomicBool,
    /// Number of successful `add_change` calls before every later one fails.
    add_budget: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_updated: AtomicBool::new(false),
            add_budget: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn fail_updated(&self, fail: bool) {
        self.fail_updated.store(fail, Ordering::SeqCst);
    }

    pub fn fail_adds_after(&self, successes: usize) {
        self.add_budget.store(successes, Ordering::SeqCst);
    }

    fn disk_full() -> StoreError {
        StoreError::Io(std::io::Error::other("disk full"))
    }
}

impl Store for FailingStore {
    fn last_check_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.last_check_date()
    }

    fn add_change(&self, change: &Change) -> Result<bool, StoreError> {
        let allowed = self
            .add_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(Self::disk_full());
        }
        self.inner.add_change(change)
    }

    fn updated(&self) -> Result<DateTime<Utc>, StoreError> {
        if self.fail_updated.load(Ordering::SeqCst) {
            return Err(Self::disk_full());
        }
        self.inner.updated()
    }

    fn recent_changes(&self, limit: usize) -> Result<Vec<Change>, StoreError> {
        self.inner.recent_changes(limit)
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.inner.count()
    }
}

/// Collects the output lines of accepted changes.
#[derive(Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl ChangeSink for RecordingSink {
    fn accepted(&self, change: &Change) {
        self.lines.lock().unwrap().push(change.summary_line());
    }
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

pub fn commit(repository: &str, sha: &str, hour: u32) -> Change {
    Change::new(ChangeKind::Commit, sha, repository, at(hour))
        .with_author("Jane Doe")
        .with_message(format!("Commit {sha}"))
        .with_url(format!("https://github.com/{repository}/commit/{sha}"))
}

pub fn release(repository: &str, id: u64, hour: u32) -> Change {
    Change::new(ChangeKind::Release, id.to_string(), repository, at(hour))
        .with_author("octocat")
        .with_message(format!("Released v{id}"))
        .with_url(format!("https://github.com/{repository}/releases/{id}"))
}

pub fn entry(source_type: &str, user: &str, repository: &str) -> RepositoryEntry {
    RepositoryEntry {
        source: SourceConfig {
            source_type: source_type.to_string(),
            user: user.to_string(),
            repository: repository.to_string(),
            filters: Vec::new(),
        },
        metadata: Metadata::new(),
    }
}
