pub mod types;

pub use types::AnalysisResult;

use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, CoalescingCache};
use crate::completion::{CompletionClient, CompletionError, CompletionRequest, OpenAiClient};
use crate::config::{Config, OpenAiConfig};
use crate::github::{GitHubClient, GitHubError, RepoSlug};
use crate::prompt;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("Analysis task failed: {0}")]
    Task(#[from] JoinError),
}

pub type AnalysisCache = CoalescingCache<AnalysisResult, AnalyzeError>;

/// Runs the repository-to-wiki pipeline and remembers its results.
///
/// Results are keyed by the raw URL string the caller sent, so
/// `octocat/Hello-World` and `https://github.com/octocat/Hello-World`
/// are analysed and cached separately.
#[derive(Clone)]
pub struct Analyzer {
    github: GitHubClient,
    completion: Arc<dyn CompletionClient>,
    openai: Arc<OpenAiConfig>,
    cache: AnalysisCache,
}

impl Analyzer {
    pub fn new(
        github: GitHubClient,
        completion: Arc<dyn CompletionClient>,
        openai: OpenAiConfig,
        cache_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            github,
            completion,
            openai: Arc::new(openai),
            cache: AnalysisCache::new(capacity),
        }
    }

    /// Wire up the GitHub and OpenAI clients described by `config`.
    ///
    /// A missing OpenAI key is not an error yet: it surfaces as
    /// `MissingApiKey` on the first completion.
    pub fn from_config(config: &Config) -> Result<Self, AnalyzeError> {
        let github = GitHubClient::new(&config.github)?;
        let completion = OpenAiClient::new(&config.openai)?;
        if !completion.has_api_key() {
            warn!("no OpenAI API key configured; analysis and chat requests will fail");
        }

        Ok(Self::new(
            github,
            Arc::new(completion),
            config.openai.clone(),
            config.cache.capacity,
        ))
    }

    pub fn completion(&self) -> Arc<dyn CompletionClient> {
        Arc::clone(&self.completion)
    }

    pub fn openai_config(&self) -> &OpenAiConfig {
        &self.openai
    }

    /// Previously computed analysis for exactly this URL string, if any.
    pub fn cached(&self, url: &str) -> Option<Arc<AnalysisResult>> {
        self.cache.get(url)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Analyse the repository `url` refers to, reusing a cached or in-flight
    /// result for the same URL. Nothing is cached unless every step succeeds.
    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn analyze(
        &self,
        url: &str,
        token: Option<String>,
    ) -> Result<Arc<AnalysisResult>, Arc<AnalyzeError>> {
        let github = self.github.clone();
        let completion = Arc::clone(&self.completion);
        let openai = Arc::clone(&self.openai);
        let raw_url = url.to_string();

        self.cache
            .get_or_try_insert_with(url, move || {
                run_pipeline(github, completion, openai, raw_url, token)
            })
            .await
    }
}

async fn run_pipeline(
    github: GitHubClient,
    completion: Arc<dyn CompletionClient>,
    openai: Arc<OpenAiConfig>,
    url: String,
    token: Option<String>,
) -> Result<AnalysisResult, AnalyzeError> {
    let slug = RepoSlug::parse(&url)?;
    debug!(owner = %slug.owner, repo = %slug.repo, "parsed repository reference");

    info!(repo = %slug, "fetching repository from GitHub");
    let snapshot = github.fetch_snapshot(&slug, token.as_deref()).await?;
    info!(files = snapshot.files.len(), readme_bytes = snapshot.readme.len(), "fetched repository");

    let prompt = prompt::build_analysis_prompt(
        &slug.owner,
        &slug.repo,
        &snapshot.file_tree_text(),
        &snapshot.readme,
    );

    info!(prompt_chars = prompt.len(), "generating wiki");
    let analysis = completion
        .complete(CompletionRequest::analysis(&openai, prompt))
        .await?;
    info!(analysis_chars = analysis.len(), "wiki generated");

    Ok(AnalysisResult {
        owner: slug.owner,
        repo: slug.repo,
        analysis,
        file_tree: snapshot.files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::MockCompletion;
    use crate::completion::Role;
    use crate::github::testing::{client_for, mock_repository};
    use mockito::Server;
    use reqwest::StatusCode;
    use std::time::Duration;

    /// Helper to build an Analyzer against a mock GitHub server.
    pub fn test_analyzer(server: &mockito::ServerGuard, completion: Arc<MockCompletion>) -> Analyzer {
        Analyzer::new(client_for(server), completion, OpenAiConfig::default(), 8)
    }

    #[tokio::test]
    async fn test_analyze_octocat() {
        let mut server = Server::new_async().await;
        let _mocks = mock_repository(
            &mut server,
            "octocat",
            "Hello-World",
            &["README.md", "src/index.js"],
            Some("Hello"),
        )
        .await;
        let completion = Arc::new(MockCompletion::replying("# Hello-World wiki"));
        let analyzer = test_analyzer(&server, Arc::clone(&completion));

        let result = analyzer.analyze("octocat/Hello-World", None).await.unwrap();

        assert_eq!(result.owner, "octocat");
        assert_eq!(result.repo, "Hello-World");
        assert_eq!(result.analysis, "# Hello-World wiki");
        assert_eq!(result.file_tree, vec!["README.md", "src/index.js"]);

        let request = completion.last_request().unwrap();
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages[0].role, Role::System);
        let prompt = &request.messages[1].content;
        assert!(prompt.contains("README.md\nsrc/index.js"));
        assert!(prompt.contains("README:\nHello"));
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let mut server = Server::new_async().await;
        // Each mock expects exactly one hit.
        let mocks = mock_repository(&mut server, "o", "r", &["a.rs"], Some("readme")).await;
        let completion = Arc::new(MockCompletion::replying("wiki"));
        let analyzer = test_analyzer(&server, Arc::clone(&completion));

        let first = analyzer.analyze("o/r", None).await.unwrap();
        let second = analyzer.analyze("o/r", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(completion.calls(), 1);
        for mock in &mocks {
            mock.assert_async().await;
        }
        assert_eq!(analyzer.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_run() {
        let mut server = Server::new_async().await;
        let _mocks = mock_repository(&mut server, "o", "r", &["a.rs"], None).await;
        let completion =
            Arc::new(MockCompletion::replying("wiki").with_delay(Duration::from_millis(50)));
        let analyzer = test_analyzer(&server, Arc::clone(&completion));

        let (a, b, c) = tokio::join!(
            analyzer.analyze("o/r", None),
            analyzer.analyze("o/r", None),
            analyzer.analyze("o/r", None),
        );

        assert_eq!(completion.calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
    }

    #[tokio::test]
    async fn test_missing_readme_still_succeeds() {
        let mut server = Server::new_async().await;
        let _mocks = mock_repository(&mut server, "o", "r", &["lib.rs"], None).await;
        let completion = Arc::new(MockCompletion::replying("wiki"));
        let analyzer = test_analyzer(&server, Arc::clone(&completion));

        let result = analyzer.analyze("o/r", None).await.unwrap();
        assert_eq!(result.file_tree, vec!["lib.rs"]);
        let prompt = completion.last_request().unwrap().messages[1].content.clone();
        assert!(prompt.contains("(no README found)"));
    }

    #[tokio::test]
    async fn test_metadata_404_fails_and_is_not_cached() {
        let mut server = Server::new_async().await;
        let _meta = server
            .mock("GET", "/repos/o/gone")
            .with_status(404)
            .with_body(r#"{"message":"Not Found"}"#)
            .create_async()
            .await;
        let _readme = server
            .mock("GET", "/repos/o/gone/readme")
            .with_status(404)
            .create_async()
            .await;
        let completion = Arc::new(MockCompletion::replying("wiki"));
        let analyzer = test_analyzer(&server, Arc::clone(&completion));

        let err = analyzer.analyze("o/gone", None).await.unwrap_err();
        assert!(matches!(*err, AnalyzeError::GitHub(GitHubError::Upstream { .. })));
        assert!(err.to_string().contains("404"));
        assert_eq!(completion.calls(), 0);
        assert!(analyzer.cached("o/gone").is_none());
    }

    #[tokio::test]
    async fn test_invalid_slug_makes_no_upstream_calls() {
        let server = Server::new_async().await;
        let completion = Arc::new(MockCompletion::replying("wiki"));
        let analyzer = test_analyzer(&server, Arc::clone(&completion));

        let err = analyzer.analyze("justonepart", None).await.unwrap_err();
        assert!(matches!(*err, AnalyzeError::GitHub(GitHubError::InvalidSlug(_))));
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn test_completion_failure_is_not_cached() {
        let mut server = Server::new_async().await;
        let _mocks = mock_repository(&mut server, "o", "r", &["a.rs"], None).await;
        let completion = Arc::new(MockCompletion::failing(StatusCode::BAD_GATEWAY));
        let analyzer = test_analyzer(&server, Arc::clone(&completion));

        let err = analyzer.analyze("o/r", None).await.unwrap_err();
        assert!(matches!(*err, AnalyzeError::Completion(CompletionError::Upstream { .. })));
        assert!(analyzer.cached("o/r").is_none());
    }
}
