//! # Prompt builder
//!
//! Composes the request sent to the completion service. The layout is fixed:
//!
//! 1. the template's system prompt (skipped when empty),
//! 2. retrieved context as a system message `Context:\n<block>` (only when a
//!    retrieval step ran and produced text),
//! 3. the active history window, oldest turn first,
//! 4. the new user utterance, wrapped with the template's pre/post content.
//!
//! This order is part of the contract; do not rearrange it.
//!
//! When `history_max_tokens` is set, the oldest history turns are dropped until
//! the remaining history fits the budget (counted with `cl100k_base`). The
//! order of what remains never changes.

use serde::Serialize;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::debug;

use crate::error::{CopilotError, Result};
use crate::models::{MemoryTurn, TurnRole};
use crate::template::ChatTemplate;

/// Prefix of the system message carrying retrieved context.
pub const CONTEXT_HEADER: &str = "Context:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl From<TurnRole> for MessageRole {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => Self::User,
            TurnRole::Assistant => Self::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling knobs forwarded to the completion service untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            stop: Vec::new(),
        }
    }
}

/// Ordered turns plus generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

pub struct PromptBuilder {
    template: ChatTemplate,
    params: GenerationParams,
    history_max_tokens: Option<usize>,
}

impl PromptBuilder {
    pub fn new(template: ChatTemplate, params: GenerationParams) -> Self {
        Self {
            template,
            params,
            history_max_tokens: None,
        }
    }

    /// Cap the history section at `budget` BPE tokens.
    pub fn with_history_budget(mut self, budget: Option<usize>) -> Self {
        self.history_max_tokens = budget;
        self
    }

    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    /// Assemble the request. `context` is the context assembler's block, or
    /// `None` when no retrieval ran.
    pub fn build(
        &self,
        context: Option<&str>,
        history: &[MemoryTurn],
        utterance: &str,
    ) -> Result<CompletionRequest> {
        let mut messages = Vec::with_capacity(history.len() + 3);

        if !self.template.system_prompt.is_empty() {
            messages.push(ChatMessage::new(
                MessageRole::System,
                self.template.system_prompt.clone(),
            ));
        }

        if let Some(block) = context.filter(|block| !block.is_empty()) {
            messages.push(ChatMessage::new(
                MessageRole::System,
                format!("{CONTEXT_HEADER}{block}"),
            ));
        }

        let history = match self.history_max_tokens {
            Some(budget) => trim_to_budget(history, budget, &bpe()?),
            None => history,
        };
        messages.extend(
            history
                .iter()
                .map(|turn| ChatMessage::new(turn.role.into(), turn.content.clone())),
        );

        messages.push(ChatMessage::new(
            MessageRole::User,
            self.template.decorate_user_message(utterance),
        ));

        debug!(messages = messages.len(), history = history.len(), "Built prompt");
        Ok(CompletionRequest {
            messages,
            params: self.params.clone(),
        })
    }
}

fn bpe() -> Result<CoreBPE> {
    cl100k_base().map_err(|e| CopilotError::Tokenizer(e.to_string()))
}

/// Longest suffix of `history` whose token count fits `budget`.
fn trim_to_budget<'a>(history: &'a [MemoryTurn], budget: usize, bpe: &CoreBPE) -> &'a [MemoryTurn] {
    let mut used = 0usize;
    let mut start = history.len();
    for (i, turn) in history.iter().enumerate().rev() {
        used += bpe.encode_with_special_tokens(&turn.content).len();
        if used > budget {
            break;
        }
        start = i;
    }
    if start > 0 {
        debug!(dropped = start, budget, "Trimmed history to token budget");
    }
    &history[start..]
}
