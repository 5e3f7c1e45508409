use std::time::Duration;

use super::models::PullRequestDetail;
use super::retry::{RetryPolicy, send_with_retry};
use crate::errors::HttpError;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Format check only; does not verify the token is active.
pub fn is_valid_github_token(token: &str) -> bool {
    !token.is_empty()
        && GITHUB_TOKEN_PREFIXES
            .iter()
            .any(|prefix| token.starts_with(prefix))
}

/// Normalize a repository reference to `owner/repo`.
///
/// Accepts a bare slug or a GitHub HTTPS URL, with or without `.git`:
/// - `owner/repo`
/// - `https://github.com/owner/repo`
/// - `https://github.com/owner/repo.git`
pub fn parse_owner_repo(input: &str) -> Option<String> {
    let path = match input.strip_prefix("https://") {
        Some(rest) => rest.strip_prefix("github.com/")?,
        None => input,
    };
    let path = path.strip_suffix(".git").unwrap_or(path);
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 2 && parts.iter().all(|p| !p.is_empty() && !p.contains(':')) {
        Some(format!("{}/{}", parts[0], parts[1]))
    } else {
        None
    }
}

/// GitHub REST client. Constructed once and handed to whoever needs it.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: Option<String>, retry: RetryPolicy) -> anyhow::Result<Self> {
        if let Some(t) = token.as_deref() {
            if !is_valid_github_token(t) {
                tracing::warn!("GITHUB_TOKEN does not look like a GitHub token; using it anyway");
            }
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("testboard/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            retry,
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub async fn get_pull_request(
        &self,
        owner_repo: &str,
        number: i64,
    ) -> Result<PullRequestDetail, HttpError> {
        let url = format!("{}/repos/{}/pulls/{}", self.api_base, owner_repo, number);
        let resp = send_with_retry(&self.retry, || {
            let req = self
                .http
                .get(&url)
                .header("Accept", "application/vnd.github+json");
            match &self.token {
                Some(token) => req.bearer_auth(token),
                None => req,
            }
        })
        .await?;
        resp.json::<PullRequestDetail>()
            .await
            .map_err(|source| HttpError::Decode { url, source })
    }
}
