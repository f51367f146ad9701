//! Loading and handling the application's configuration.
//!
//! The configuration is a YAML file, by default `<config_dir>/config.yaml`
//! (see [`crate::config_dir`]). Every field except the endpoint triple has a
//! default, so a minimal file looks like:
//!
//! ```yaml
//! api_base: "http://127.0.0.1:8080/v1"
//! api_key: ""
//! model: "local-copilot"
//! ```
//!
//! ```no_run
//! use context_copilot::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml".as_ref()).unwrap();
//! println!("{:?}", config);
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::prompt::GenerationParams;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct CopilotConfig {
    /// Base URL of the OpenAI-compatible completion endpoint.
    pub api_base: String,

    /// API key; may be empty for a local, unsecured backend.
    pub api_key: String,

    /// Model name sent with every request.
    pub model: String,

    /// Maximum tokens the model may generate per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub stop_words: Vec<String>,

    /// SQLite database holding both the corpus and the conversation log.
    #[serde(default = "default_db_url")]
    pub db_url: String,

    /// Conversation whose memory is read and appended.
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Corpus that `search`/`ask` query and `index` writes.
    #[serde(default = "default_corpus")]
    pub corpus: String,

    /// Records retrieved per question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Turns in the active memory window.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,

    /// Optional BPE token cap on the history section of a prompt.
    #[serde(default)]
    pub history_max_tokens: Option<usize>,

    /// Deadline for one completion call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Stream the reply instead of waiting for the full response.
    #[serde(default)]
    pub stream: Option<bool>,

    /// Score pages of the corpus on the rayon pool.
    #[serde(default)]
    pub parallel_search: bool,

    /// Maximum characters per ingested chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// File extensions picked up by `index`.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

fn default_db_url() -> String {
    "copilot.db".to_string()
}

fn default_session_name() -> String {
    "default".to_string()
}

fn default_corpus() -> String {
    "default".to_string()
}

fn default_top_k() -> usize {
    6
}

fn default_memory_window() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_chunk_size() -> usize {
    1500
}

fn default_extensions() -> Vec<String> {
    ["py", "js", "html", "md", "txt"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080/v1".to_string(),
            api_key: String::new(),
            model: "local-copilot".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stop_words: Vec::new(),
            db_url: default_db_url(),
            session_name: default_session_name(),
            corpus: default_corpus(),
            top_k: default_top_k(),
            memory_window: default_memory_window(),
            history_max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
            stream: None,
            parallel_search: false,
            chunk_size: default_chunk_size(),
            extensions: default_extensions(),
        }
    }
}

impl CopilotConfig {
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stop: self.stop_words.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Read and parse a YAML configuration file.
pub fn load_config(file: &Path) -> Result<CopilotConfig> {
    tracing::debug!("Loading config from {}", file.display());
    let content = fs::read_to_string(file)?;
    Ok(serde_yaml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com"
model: "example_model"
db_url: "copilot-test.db"
top_k: 3
memory_window: 4
stop_words: ["<|im_end|>", "\n"]
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com");
        assert_eq!(config.model, "example_model");
        assert_eq!(config.db_url, "copilot-test.db");
        assert_eq!(config.top_k, 3);
        assert_eq!(config.memory_window, 4);
        assert_eq!(config.stop_words, vec!["<|im_end|>", "\n"]);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.extensions, default_extensions());
    }

    #[test]
    fn test_load_config_invalid_file() {
        assert!(load_config(Path::new("non/existent/path")).is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();
        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_round_trips_through_yaml() {
        let config = CopilotConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: CopilotConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.generation_params().temperature, 0.7);
    }
}
