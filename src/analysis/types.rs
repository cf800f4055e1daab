use serde::{Deserialize, Serialize};

/// Generated wiki for one repository, as returned by `POST /api/analyze`.
/// Never mutated after construction; shared between cache and callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub owner: String,
    pub repo: String,
    /// Markdown document produced by the completion service
    pub analysis: String,
    /// Blob paths the analysis was based on
    pub file_tree: Vec<String>,
}
