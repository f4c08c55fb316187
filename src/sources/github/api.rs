use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::prompt::CredentialPrompt;
use super::GitHubCredentials;
use crate::error::SourceError;

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const OTP_HEADER: &str = "x-github-otp";

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRelease {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<RawUser>,
    pub html_url: String,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCommit {
    pub sha: String,
    pub commit: RawCommitDetails,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCommitDetails {
    pub message: String,
    pub author: RawSignature,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSignature {
    pub name: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    pub resources: RateLimitResources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitWindow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitWindow {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

/// The slice of the GitHub REST API the adapter needs.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Most recent releases, newest first.
    async fn releases(
        &self,
        user: &str,
        repository: &str,
        per_page: usize,
    ) -> Result<Vec<RawRelease>, SourceError>;

    /// Most recent commits on the default branch, newest first.
    async fn commits(
        &self,
        user: &str,
        repository: &str,
        per_page: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawCommit>, SourceError>;

    async fn rate_limit(&self) -> Result<RateLimit, SourceError>;
}

/// `GitHubApi` over HTTPS.
#[derive(Clone)]
pub struct HttpGitHubApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    user_agent: String,
    otp: Option<String>,
}

impl fmt::Debug for HttpGitHubApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGitHubApi")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("two_factor", &self.otp.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpGitHubApi {
    pub fn new(credentials: &GitHubCredentials) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: credentials.token.clone(),
            user_agent: format!("chglg ({})", credentials.id),
            otp: None,
        })
    }

    /// Build the client and verify the login. When GitHub asks for a
    /// two-factor code the prompt is asked exactly once and the code is sent
    /// with every later request.
    pub async fn connect(
        credentials: &GitHubCredentials,
        prompt: &dyn CredentialPrompt,
    ) -> Result<Self, SourceError> {
        let mut api = Self::new(credentials)?;

        let mut response = api.request("/user").send().await?;
        if needs_two_factor(response.status(), response.headers()) {
            let code = prompt
                .two_factor_code()
                .await
                .map_err(|e| SourceError::Unavailable(format!("two-factor prompt failed: {e}")))?;
            api.otp = Some(code);
            response = api.request("/user").send().await?;
        }

        let user: RawUser = decode(response, "authenticated user").await?;
        if user.login != credentials.id {
            warn!(
                login = %user.login,
                expected = %credentials.id,
                "token belongs to a different GitHub account"
            );
        }
        debug!(login = %user.login, "authenticated with GitHub");

        Ok(api)
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, &self.user_agent);

        match &self.otp {
            Some(code) => builder.header(OTP_HEADER, code),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        resource: &str,
    ) -> Result<T, SourceError> {
        let response = self.request(path).query(query).send().await?;
        decode(response, resource).await
    }
}

#[async_trait]
impl GitHubApi for HttpGitHubApi {
    async fn releases(
        &self,
        user: &str,
        repository: &str,
        per_page: usize,
    ) -> Result<Vec<RawRelease>, SourceError> {
        let path = format!("/repos/{user}/{repository}/releases");
        let query = [("per_page", per_page.to_string())];
        self.get_json(&path, &query, &format!("{user}/{repository}"))
            .await
    }

    async fn commits(
        &self,
        user: &str,
        repository: &str,
        per_page: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawCommit>, SourceError> {
        let path = format!("/repos/{user}/{repository}/commits");
        let mut query = vec![("per_page", per_page.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        self.get_json(&path, &query, &format!("{user}/{repository}"))
            .await
    }

    async fn rate_limit(&self) -> Result<RateLimit, SourceError> {
        self.get_json("/rate_limit", &[], "rate limit").await
    }
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    resource: &str,
) -> Result<T, SourceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, response.headers(), resource, Utc::now()));
    }

    response
        .json()
        .await
        .map_err(|e| SourceError::Unavailable(format!("unexpected response for {resource}: {e}")))
}

fn needs_two_factor(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::UNAUTHORIZED
        && headers
            .get(OTP_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().starts_with("required"))
}

/// Map a non-success response onto the adapter error taxonomy.
pub fn status_error(
    status: StatusCode,
    headers: &HeaderMap,
    resource: &str,
    now: DateTime<Utc>,
) -> SourceError {
    let exhausted = header_str(headers, "x-ratelimit-remaining") == Some("0");
    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (exhausted || headers.contains_key("retry-after")));

    if throttled {
        return SourceError::RateLimited {
            retry_after: retry_hint(headers, now),
        };
    }

    match status {
        StatusCode::NOT_FOUND => SourceError::NotFound(resource.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::Unavailable(format!("GitHub rejected the credentials ({status})"))
        }
        _ => SourceError::Unavailable(format!("GitHub answered {status} for {resource}")),
    }
}

fn retry_hint(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }

    header_str(headers, "x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok())
        .map(|reset| Duration::from_secs((reset - now.timestamp()).max(0) as u64))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn not_found_maps_to_not_found() {
        let err = status_error(StatusCode::NOT_FOUND, &HeaderMap::new(), "octo/missing", now());
        assert!(matches!(err, SourceError::NotFound(ref r) if r == "octo/missing"));
    }

    #[test]
    fn too_many_requests_carries_retry_after() {
        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            &headers(&[("retry-after", "42")]),
            "octo/repo",
            now(),
        );
        assert!(matches!(
            err,
            SourceError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(42)
        ));
    }

    #[test]
    fn exhausted_quota_uses_reset_time() {
        let err = status_error(
            StatusCode::FORBIDDEN,
            &headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1700000090")]),
            "octo/repo",
            now(),
        );
        assert!(matches!(
            err,
            SourceError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(90)
        ));
    }

    #[test]
    fn plain_forbidden_is_unavailable() {
        let err = status_error(StatusCode::FORBIDDEN, &HeaderMap::new(), "octo/repo", now());
        assert!(matches!(err, SourceError::Unavailable(_)));

        let err = status_error(StatusCode::BAD_GATEWAY, &HeaderMap::new(), "octo/repo", now());
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[test]
    fn otp_challenge_detection() {
        assert!(needs_two_factor(
            StatusCode::UNAUTHORIZED,
            &headers(&[("x-github-otp", "required; app")])
        ));
        assert!(!needs_two_factor(StatusCode::UNAUTHORIZED, &HeaderMap::new()));
        assert!(!needs_two_factor(
            StatusCode::OK,
            &headers(&[("x-github-otp", "required; sms")])
        ));
    }

    #[test]
    fn release_payload_with_null_name_parses() {
        let json = r#"{
            "id": 7, "tag_name": "v1.0.0", "name": null,
            "published_at": "2024-01-02T03:04:05Z",
            "author": {"login": "octocat"},
            "html_url": "https://github.com/octo/repo/releases/tag/v1.0.0",
            "draft": false
        }"#;
        let release: RawRelease = serde_json::from_str(json).unwrap();
        assert_eq!(release.name, None);
        assert_eq!(release.author.unwrap().login, "octocat");
    }
}
