use serde::Deserialize;
use std::fmt;

/// Owner and repository name of a GitHub repository.
/// Produced by `RepoSlug::parse` in github/mod.rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Everything the analysis prompt needs from GitHub.
#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    /// Blob paths of the default branch, in the order GitHub listed them
    pub files: Vec<String>,
    /// Decoded README, or empty when the repository has none
    pub readme: String,
}

impl RepoSnapshot {
    /// The file list as one path per line.
    pub fn file_tree_text(&self) -> String {
        self.files.join("\n")
    }
}

/// Subset of `GET /repos/{owner}/{repo}`.
#[derive(Debug, Deserialize)]
pub(crate) struct RepoMetadata {
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// `GET /repos/{owner}/{repo}/git/trees/{branch}?recursive=1`.
#[derive(Debug, Deserialize)]
pub(crate) struct TreeResponse {
    #[serde(default)]
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeEntry {
    pub fn is_file(&self) -> bool {
        self.kind == "blob"
    }
}

/// `GET /repos/{owner}/{repo}/readme`.
#[derive(Debug, Deserialize)]
pub(crate) struct ReadmeResponse {
    pub content: String,
}
