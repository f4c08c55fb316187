mod api;
mod prompt;

pub use api::{
    status_error, GitHubApi, HttpGitHubApi, RateLimit, RateLimitResources, RateLimitWindow,
    RawCommit, RawCommitDetails, RawRelease, RawSignature, RawUser, DEFAULT_BASE_URL,
};
pub use prompt::{CredentialPrompt, StaticPrompt, StdinPrompt};

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt;
use tracing::debug;

use super::{ChangeRequest, ChangeStream, SourceAdapter};
use crate::domain::{first_line, Change, ChangeKind};
use crate::error::{ConfigError, SourceError};

pub const SOURCE_TYPE: &str = "github";

/// Token and account identifier, read from the environment.
#[derive(Clone)]
pub struct GitHubCredentials {
    pub token: String,
    pub id: String,
}

impl GitHubCredentials {
    pub const TOKEN_VAR: &'static str = "GITHUB_TOKEN";
    pub const ID_VAR: &'static str = "GITHUB_ID";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };

        Ok(Self {
            token: read(Self::TOKEN_VAR)?,
            id: read(Self::ID_VAR)?,
        })
    }
}

impl fmt::Debug for GitHubCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubCredentials")
            .field("token", &"<redacted>")
            .field("id", &self.id)
            .finish()
    }
}

/// Releases and commits of GitHub repositories.
pub struct GitHubAdapter<A = HttpGitHubApi> {
    api: A,
}

impl<A: GitHubApi> GitHubAdapter<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }
}

impl GitHubAdapter<HttpGitHubApi> {
    pub async fn connect(
        credentials: &GitHubCredentials,
        prompt: &dyn CredentialPrompt,
    ) -> Result<Self, SourceError> {
        HttpGitHubApi::connect(credentials, prompt).await.map(Self::new)
    }
}

/// Drafts have no publication date and are skipped.
pub fn normalize_release(raw: &RawRelease, repository: &str) -> Option<Change> {
    let published_at = raw.published_at?;
    let name = raw
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(&raw.tag_name);
    let author = raw
        .author
        .as_ref()
        .map(|a| a.login.as_str())
        .unwrap_or("ghost");

    Some(
        Change::new(ChangeKind::Release, raw.id.to_string(), repository, published_at)
            .with_author(author)
            .with_message(format!("Released {name}"))
            .with_url(&raw.html_url),
    )
}

pub fn normalize_commit(raw: &RawCommit, repository: &str) -> Change {
    Change::new(
        ChangeKind::Commit,
        &raw.sha,
        repository,
        raw.commit.author.date,
    )
    .with_author(&raw.commit.author.name)
    .with_message(first_line(&raw.commit.message))
    .with_url(&raw.html_url)
}

#[async_trait]
impl<A: GitHubApi> SourceAdapter for GitHubAdapter<A> {
    fn source_type(&self) -> &'static str {
        SOURCE_TYPE
    }

    fn get_changes(&self, request: ChangeRequest) -> ChangeStream<'_> {
        let stream = try_stream! {
            let full_name = request.full_name();

            // The releases endpoint has no `since`, so the watermark is applied here.
            let releases = self
                .api
                .releases(&request.user, &request.repository, request.limit)
                .await?;
            debug!(repository = %full_name, count = releases.len(), "fetched releases");
            for raw in &releases {
                let Some(change) = normalize_release(raw, &full_name) else {
                    continue;
                };
                if request.since.is_some_and(|since| change.date <= since) {
                    continue;
                }
                yield change;
            }

            let commits = self
                .api
                .commits(&request.user, &request.repository, request.limit, request.since)
                .await?;
            debug!(repository = %full_name, count = commits.len(), "fetched commits");
            for raw in &commits {
                if let Some(change) = request.filters.apply(normalize_commit(raw, &full_name)) {
                    yield change;
                }
            }
        };
        stream.boxed()
    }

    async fn health_check(&self) -> Result<bool, SourceError> {
        let limit = self.api.rate_limit().await?;
        debug!(
            remaining = limit.resources.core.remaining,
            limit = limit.resources.core.limit,
            "GitHub rate limit"
        );
        Ok(limit.resources.core.remaining > 0)
    }
}
