//! # Copilot
//!
//! Front-end facing entry points. A [`Copilot`] owns the explicitly constructed
//! [`VectorStore`] and [`MemoryBuffer`], an [`Embedder`] and a
//! [`CompletionService`], and wires them into two operations:
//!
//! - [`Copilot::search`]: embed a query and return the top-k stored records.
//! - [`Copilot::chat`]: retrieve context, read the memory window, build the
//!   prompt, call the completion service and record the exchange.
//!
//! ## Chat turn sequence
//!
//! 1. Read the active memory window (before the new turn is stored).
//! 2. Optionally retrieve and assemble context for the utterance.
//! 3. Persist the user turn.
//! 4. Call the completion service, bounded by the copilot's timeout whatever
//!    the service does with it.
//! 5. Persist the assistant reply, only if the call succeeded.
//!
//! A failed call leaves the user turn in memory and returns the error.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::completion::CompletionService;
use crate::config::CopilotConfig;
use crate::context;
use crate::embedding::Embedder;
use crate::error::{CopilotError, Result};
use crate::memory::MemoryBuffer;
use crate::models::TurnRole;
use crate::prompt::PromptBuilder;
use crate::search::{self, ScoredRecord};
use crate::template::ChatTemplate;
use crate::vector_store::VectorStore;

pub struct Copilot<E, C> {
    store: VectorStore,
    memory: MemoryBuffer,
    prompt: PromptBuilder,
    embedder: E,
    completion: C,
    top_k: usize,
    parallel_search: bool,
    timeout: Duration,
}

impl<E: Embedder, C: CompletionService> Copilot<E, C> {
    pub fn new(
        store: VectorStore,
        memory: MemoryBuffer,
        prompt: PromptBuilder,
        embedder: E,
        completion: C,
    ) -> Self {
        Self {
            store,
            memory,
            prompt,
            embedder,
            completion,
            top_k: 6,
            parallel_search: false,
            timeout: Duration::from_secs(120),
        }
    }

    /// Open the store and memory named in `config` and build a copilot on them.
    pub fn from_config(
        config: &CopilotConfig,
        template: ChatTemplate,
        embedder: E,
        completion: C,
    ) -> Result<Self> {
        let store = VectorStore::open(&config.db_url, config.corpus.clone())?;
        let memory = MemoryBuffer::open(&config.db_url, &config.session_name, config.memory_window)?;
        let prompt = PromptBuilder::new(template, config.generation_params())
            .with_history_budget(config.history_max_tokens);

        Ok(Self::new(store, memory, prompt, embedder, completion)
            .with_top_k(config.top_k)
            .with_parallel_search(config.parallel_search)
            .with_timeout(config.request_timeout()))
    }

    /// Records retrieved per chat turn.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_parallel_search(mut self, parallel: bool) -> Self {
        self.parallel_search = parallel;
        self
    }

    /// Deadline for each completion call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn memory(&self) -> &MemoryBuffer {
        &self.memory
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn completion(&self) -> &C {
        &self.completion
    }

    /// Embed `query` and return the `k` most similar records, best first.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query)?;
        let hits = if self.parallel_search {
            search::search_parallel(&self.store, &vector, k)?
        } else {
            search::search(&self.store, &vector, k)?
        };
        debug!(query, k, hits = hits.len(), "Search finished");
        Ok(hits)
    }

    /// Answer `utterance` using retrieved context and conversation memory.
    pub async fn chat(&self, utterance: &str) -> Result<String> {
        self.respond(utterance, true).await
    }

    /// Answer `utterance` from memory alone, skipping retrieval.
    pub async fn chat_without_context(&self, utterance: &str) -> Result<String> {
        self.respond(utterance, false).await
    }

    async fn respond(&self, utterance: &str, use_context: bool) -> Result<String> {
        let history = self.memory.active_window()?;

        let context_block = if use_context {
            let hits = self.search(utterance, self.top_k)?;
            Some(context::assemble(&hits))
        } else {
            None
        };

        let request = self
            .prompt
            .build(context_block.as_deref(), &history, utterance)?;

        self.memory.append(TurnRole::User, utterance)?;
        let call = self.completion.complete(&request, self.timeout);
        let reply = match tokio::time::timeout(self.timeout, call).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(
                    session = self.memory.session_name(),
                    "Completion exceeded {:?}", self.timeout
                );
                return Err(CopilotError::Timeout(self.timeout));
            }
        };
        self.memory.append(TurnRole::Assistant, reply.clone())?;

        info!(
            session = self.memory.session_name(),
            history = history.len(),
            "Recorded exchange"
        );
        Ok(reply)
    }
}
