use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::analysis::AnalysisResult;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write wiki file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Output the wiki to the terminal (default) or to a markdown file.
#[instrument(skip(result), fields(owner = %result.owner, repo = %result.repo))]
pub fn output(result: &AnalysisResult, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing wiki to terminal");
            print_terminal_wiki(result);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing wiki to file");
            std::fs::write(path, render_markdown(result))?;
            Ok(())
        }
    }
}

/// ═══ owner/repo ═══
/// Files: 12
///
/// <wiki markdown>
fn print_terminal_wiki(result: &AnalysisResult) {
    println!();
    println!(
        "{}",
        format!("═══ {}/{} ═══", result.owner, result.repo).cyan().bold()
    );
    println!("Files: {}", result.file_tree.len().to_string().bold());
    println!();
    println!("{}", result.analysis.trim_end());
    println!();
}

fn render_markdown(result: &AnalysisResult) -> String {
    let mut md = String::new();
    md.push_str(&format!("# {}/{}\n\n", result.owner, result.repo));
    md.push_str(result.analysis.trim_end());
    md.push_str("\n\n");

    md.push_str(&format!("## File Tree ({} files)\n\n", result.file_tree.len()));
    if result.file_tree.is_empty() {
        md.push_str("No files.\n");
    } else {
        for path in &result.file_tree {
            md.push_str(&format!("- `{}`\n", path));
        }
    }
    md
}
