//! # Template loading and structure
//!
//! A template is a small YAML document that steers the assistant:
//! - a `system_prompt` sent ahead of everything else,
//! - optional `pre_user_message_content` / `post_user_message_content` strings
//!   wrapped around every user utterance at send time.
//!
//! Templates live under the configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are a coding copilot for the user's local projects."
//! post_user_message_content: "Answer concisely and with code examples if relevant."
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name of the template `copilot init` writes and `ask` uses by default.
pub const DEFAULT_TEMPLATE: &str = "copilot";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChatTemplate {
    /// Global instruction used as the leading system message. Empty means none.
    #[serde(default)]
    pub system_prompt: String,

    /// Extra text added **before** each user message at send time.
    #[serde(default)]
    pub pre_user_message_content: Option<String>,

    /// Extra text added **after** each user message at send time.
    #[serde(default)]
    pub post_user_message_content: Option<String>,
}

impl ChatTemplate {
    /// Template written by `copilot init`.
    pub fn default_copilot() -> Self {
        Self {
            system_prompt: "You are a local coding copilot. Use the provided context when it is relevant and say so when it is not.".to_string(),
            pre_user_message_content: None,
            post_user_message_content: Some(
                "Answer concisely and with code examples if relevant.".to_string(),
            ),
        }
    }

    /// Wrap `utterance` with the pre/post content, separated by single spaces.
    pub fn decorate_user_message(&self, utterance: &str) -> String {
        let mut message = utterance.to_string();
        if let Some(prepend) = &self.pre_user_message_content {
            message = format!("{prepend} {message}");
        }
        if let Some(append) = &self.post_user_message_content {
            message = format!("{message} {append}");
        }
        message
    }
}

/// Load `<config_dir>/templates/<name>.yaml`.
pub fn load_template(name: &str) -> Result<ChatTemplate> {
    let path = crate::config_dir()?
        .join("templates")
        .join(format!("{name}.yaml"));
    load_template_from(&path)
}

/// Load a template from an explicit path.
pub fn load_template_from(path: &Path) -> Result<ChatTemplate> {
    tracing::info!("Loading template: {}", path.display());
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}
