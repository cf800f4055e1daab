//! Prompt text sent to the completion service.
//!
//! Everything here is pure string assembly so it can be tested without a
//! network and produces byte-identical prompts for identical inputs.

/// System message for the analysis completion.
pub const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are a senior software architect. Provide clear, concise markdown explanations.";

/// System message for chat when nothing better is known.
pub const DEFAULT_CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const WIKI_SECTIONS: &[&str] = &[
    "Architecture Overview",
    "Key Features",
    "Implementation Details",
    "Usage",
    "API Reference",
    "Configuration",
    "Dependencies",
];

/// Build the instruction that asks for the repository wiki.
pub fn build_analysis_prompt(owner: &str, repo: &str, file_tree: &str, readme: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a senior software architect writing the internal wiki for a GitHub repository.\n",
    );
    prompt.push_str(&format!(
        "Explain the repository {owner}/{repo} as a single markdown document.\n\n"
    ));

    prompt.push_str("Structure the document exactly as follows:\n");
    prompt.push_str(
        "1. Start with a <details> block titled \"Relevant source files\" that lists the files \
         you drew on as markdown links to https://github.com/",
    );
    prompt.push_str(&format!("{owner}/{repo}/blob/HEAD/<path>.\n"));
    prompt.push_str("2. Follow with a table of contents linking to every section below.\n");
    prompt.push_str("3. Write one `##` section for each of:\n");
    for section in WIKI_SECTIONS {
        prompt.push_str(&format!("   - {section}\n"));
    }
    prompt.push_str(
        "4. Include at least one Mermaid diagram (```mermaid fenced block) showing the main \
         components and how they interact.\n",
    );
    prompt.push_str(
        "5. Back every technical claim with a citation of the form `path/to/file:line` or \
         `path/to/file:start-end`, using only paths from the file tree below.\n",
    );
    prompt.push_str(
        "Do not invent files, functions or behaviour that the file tree and README do not \
         support; say so when something cannot be determined.\n\n",
    );

    prompt.push_str("FILE_TREE:\n");
    prompt.push_str(file_tree);
    prompt.push_str("\n\nREADME:\n");
    if readme.is_empty() {
        prompt.push_str("(no README found)");
    } else {
        prompt.push_str(readme);
    }
    prompt.push('\n');
    prompt
}

/// System prompt that grounds a chat in a finished analysis.
pub fn chat_system_prompt(analysis: &str, file_tree: &[String]) -> String {
    if analysis.is_empty() {
        return DEFAULT_CHAT_SYSTEM_PROMPT.to_string();
    }
    format!(
        "You are an expert on the following GitHub repository. Use the analysis below and the \
         file tree to answer questions.\n\nANALYSIS:\n{}\n\nFILE_TREE:\n{}",
        analysis,
        file_tree.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_tree_and_readme() {
        let prompt = build_analysis_prompt("octocat", "Hello-World", "README.md\nsrc/index.js", "Hello");
        assert!(prompt.contains("FILE_TREE:\nREADME.md\nsrc/index.js"));
        assert!(prompt.contains("README:\nHello"));
        assert!(prompt.contains("octocat/Hello-World"));
    }

    #[test]
    fn test_prompt_requests_wiki_structure() {
        let prompt = build_analysis_prompt("o", "r", "a.rs", "");
        assert!(prompt.starts_with("You are a senior software architect"));
        for section in WIKI_SECTIONS {
            assert!(prompt.contains(section), "missing section {section}");
        }
        assert!(prompt.contains("Relevant source files"));
        assert!(prompt.contains("table of contents"));
        assert!(prompt.contains("mermaid"));
        assert!(prompt.contains("path/to/file:line"));
    }

    #[test]
    fn test_prompt_marks_missing_readme() {
        let prompt = build_analysis_prompt("o", "r", "a.rs", "");
        assert!(prompt.contains("README:\n(no README found)"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_analysis_prompt("o", "r", "x\ny", "readme");
        let b = build_analysis_prompt("o", "r", "x\ny", "readme");
        assert_eq!(a, b);
    }

    #[test]
    fn test_chat_prompt_includes_analysis_and_tree() {
        let prompt = chat_system_prompt("# Wiki", &["a.rs".to_string(), "b.rs".to_string()]);
        assert!(prompt.starts_with("You are an expert on the following GitHub repository"));
        assert!(prompt.contains("ANALYSIS:\n# Wiki"));
        assert!(prompt.ends_with("FILE_TREE:\na.rs\nb.rs"));
    }

    #[test]
    fn test_chat_prompt_without_analysis() {
        assert_eq!(chat_system_prompt("", &[]), DEFAULT_CHAT_SYSTEM_PROMPT);
    }
}
