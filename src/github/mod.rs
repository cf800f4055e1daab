pub mod types;

pub use types::{RepoSlug, RepoSnapshot};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::GitHubConfig;
use types::{ReadmeResponse, RepoMetadata, TreeResponse};

const USER_AGENT: &str = concat!("wikinalysis/", env!("CARGO_PKG_VERSION"));
const FALLBACK_BRANCH: &str = "main";

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("Invalid GitHub repository reference {0:?}: expected owner/repo or https://github.com/owner/repo")]
    InvalidSlug(String),

    #[error("GitHub {resource} failed: {status}")]
    Upstream {
        resource: &'static str,
        status: StatusCode,
    },

    #[error("GitHub API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to decode README: {0}")]
    Decode(String),

    #[error("Invalid GitHub API base URL {0:?}")]
    InvalidApiBase(String),
}

impl RepoSlug {
    /// Parse either `owner/repo` or a full repository URL.
    ///
    /// Anything that does not start with an HTTP scheme is split on `/` after
    /// dropping leading slashes. URLs contribute their first two path
    /// segments. Segments are taken literally; the host is not checked.
    pub fn parse(raw: &str) -> Result<RepoSlug, GitHubError> {
        let invalid = || GitHubError::InvalidSlug(raw.to_string());

        let (owner, repo) = if has_http_scheme(raw) {
            let parsed = Url::parse(raw).map_err(|_| invalid())?;
            let mut segments = parsed.path().split('/').skip(1);
            (
                segments.next().unwrap_or_default().to_string(),
                segments.next().unwrap_or_default().to_string(),
            )
        } else {
            let mut segments = raw.trim_start_matches('/').split('/');
            (
                segments.next().unwrap_or_default().to_string(),
                segments.next().unwrap_or_default().to_string(),
            )
        };

        if owner.is_empty() || repo.is_empty() {
            return Err(invalid());
        }
        Ok(RepoSlug { owner, repo })
    }
}

/// `http:` or `https:` in any case. Slashes after the colon are left to the
/// URL parser, which treats `https:/host/..` and `https:host/..` like
/// `https://host/..`.
fn has_http_scheme(raw: &str) -> bool {
    ["http:", "https:"].iter().any(|scheme| {
        raw.as_bytes()
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme.as_bytes()))
    })
}

/// Thin client over the three GitHub REST endpoints the wiki needs.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: Url,
    default_token: Option<String>,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let api_base = Url::parse(&config.api_base)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| GitHubError::InvalidApiBase(config.api_base.clone()))?;

        Ok(Self {
            http,
            api_base,
            default_token: config.token.clone(),
        })
    }

    /// API base joined with `segments`, each one percent-encoded, so a `#`
    /// or `?` in a name or branch stays inside its segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Build a GET against the API base. The per-request token wins over the
    /// configured one; with neither the call is anonymous.
    fn get(&self, segments: &[&str], token: Option<&str>) -> reqwest::RequestBuilder {
        let request = self
            .http
            .get(self.endpoint(segments))
            .header(ACCEPT, "application/vnd.github+json");

        match token
            .filter(|t| !t.is_empty())
            .or(self.default_token.as_deref())
        {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch the file tree and README concurrently.
    ///
    /// A tree failure fails the snapshot; a README failure only empties it.
    #[instrument(skip(self, token), fields(owner = %slug.owner, repo = %slug.repo))]
    pub async fn fetch_snapshot(
        &self,
        slug: &RepoSlug,
        token: Option<&str>,
    ) -> Result<RepoSnapshot, GitHubError> {
        let (files, readme) = tokio::join!(
            self.fetch_file_tree(slug, token),
            self.fetch_readme(slug, token),
        );
        let files = files?;
        debug!(files = files.len(), readme_bytes = readme.len(), "fetched repository snapshot");

        Ok(RepoSnapshot { files, readme })
    }

    /// Look up the default branch, falling back to `main` when GitHub omits it.
    #[instrument(skip(self, token), fields(owner = %slug.owner, repo = %slug.repo))]
    pub async fn fetch_default_branch(
        &self,
        slug: &RepoSlug,
        token: Option<&str>,
    ) -> Result<String, GitHubError> {
        let response = self
            .get(&["repos", &slug.owner, &slug.repo], token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitHubError::Upstream {
                resource: "repository lookup",
                status,
            });
        }

        let metadata = response.json::<RepoMetadata>().await?;
        Ok(metadata
            .default_branch
            .filter(|branch| !branch.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string()))
    }

    /// Paths of every blob on the default branch, in the order GitHub returns them.
    #[instrument(skip(self, token), fields(owner = %slug.owner, repo = %slug.repo))]
    pub async fn fetch_file_tree(
        &self,
        slug: &RepoSlug,
        token: Option<&str>,
    ) -> Result<Vec<String>, GitHubError> {
        let branch = self.fetch_default_branch(slug, token).await?;
        debug!(%branch, "resolved default branch");

        let response = self
            .get(
                &["repos", &slug.owner, &slug.repo, "git", "trees", &branch],
                token,
            )
            .query(&[("recursive", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitHubError::Upstream {
                resource: "tree fetch",
                status,
            });
        }

        let listing = response.json::<TreeResponse>().await?;
        if listing.truncated {
            warn!(%branch, entries = listing.tree.len(), "GitHub truncated the recursive tree listing");
        }

        Ok(listing
            .tree
            .into_iter()
            .filter(|entry| entry.is_file())
            .map(|entry| entry.path)
            .collect())
    }

    /// Decoded README text. Never fails: a missing or unreadable README is
    /// reported as an empty string.
    #[instrument(skip(self, token), fields(owner = %slug.owner, repo = %slug.repo))]
    pub async fn fetch_readme(&self, slug: &RepoSlug, token: Option<&str>) -> String {
        match self.try_fetch_readme(slug, token).await {
            Ok(readme) => readme,
            Err(err) => {
                warn!(error = %err, "README unavailable, continuing without it");
                String::new()
            }
        }
    }

    async fn try_fetch_readme(
        &self,
        slug: &RepoSlug,
        token: Option<&str>,
    ) -> Result<String, GitHubError> {
        let response = self
            .get(&["repos", &slug.owner, &slug.repo, "readme"], token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitHubError::Upstream {
                resource: "README fetch",
                status,
            });
        }

        let readme = response.json::<ReadmeResponse>().await?;
        decode_content(&readme.content)
    }
}

/// GitHub wraps base64 content at 60 columns, so whitespace is dropped first.
fn decode_content(encoded: &str) -> Result<String, GitHubError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| GitHubError::Decode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
