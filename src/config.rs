use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File looked up in the current directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = ".wikinalysis.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from .wikinalysis.toml.
///
/// All fields are optional; the service runs with zero config as long as
/// an OpenAI key is available from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Default GitHub token, used when a request does not carry its own.
    /// If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.github.com".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// If None, falls back to OPENAI_API_KEY env var.
    pub api_key: Option<String>,
    pub base_url: String,
    pub analysis_model: String,
    pub chat_model: String,
    pub temperature: f32,
    /// Deadline for a whole non-streaming completion.
    pub timeout_secs: u64,
    /// Longest silence tolerated between two chunks of a streamed completion.
    pub stream_idle_timeout_secs: u64,
    /// Tokens buffered between the upstream reader and the HTTP response.
    pub stream_buffer: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            analysis_model: "gpt-4o-mini".to_string(),
            chat_model: "o4-mini".to_string(),
            temperature: 0.2,
            timeout_secs: 120,
            stream_idle_timeout_secs: 60,
            stream_buffer: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of analyses kept in memory.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 128 }
    }
}

impl Config {
    /// Load configuration from `path`, or from .wikinalysis.toml in the
    /// current directory. Returns default config if neither exists, then
    /// fills missing credentials from the environment.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from(default_path)?
                } else {
                    Config::default()
                }
            }
        };

        if config.github.token.is_none() {
            config.github.token = non_empty_env("GITHUB_TOKEN");
        }
        if config.openai.api_key.is_none() {
            config.openai.api_key = non_empty_env("OPENAI_API_KEY");
        }

        Ok(config)
    }

    /// Load from a specific path without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert!(config.openai.api_key.is_none());
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert_eq!(config.openai.analysis_model, "gpt-4o-mini");
        assert_eq!(config.openai.chat_model, "o4-mini");
        assert_eq!(config.cache.capacity, 128);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[server]
bind = "0.0.0.0:8080"

[openai]
analysis_model = "gpt-4.1"
temperature = 0.0

[cache]
capacity = 4
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.openai.analysis_model, "gpt-4.1");
        assert_eq!(config.openai.temperature, 0.0);
        // Unset fields inside a present section keep their defaults.
        assert_eq!(config.openai.chat_model, "o4-mini");
        assert_eq!(config.github.timeout_secs, 30);
        assert_eq!(config.cache.capacity, 4);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wiki.toml");
        fs::write(&path, "[github]\ntoken = \"ghp_file\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.github.token.as_deref(), Some("ghp_file"));
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = Config::load_from(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_load_from_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[cache\ncapacity = ").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
