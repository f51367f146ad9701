//! # Completion service
//!
//! The generative model is an external collaborator reached through
//! [`CompletionService`]: one request in, one reply (or error) out, bounded by
//! a caller-supplied timeout.
//!
//! [`OpenAiCompletion`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint (a local `llama.cpp` server, vLLM, OpenAI itself). Failures and
//! timeouts are surfaced verbatim; this layer never invents a reply.

use std::future::Future;
use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::CopilotConfig;
use crate::error::{CopilotError, Result};
use crate::prompt::{ChatMessage, CompletionRequest, MessageRole};

/// Request/response access to a generative model.
pub trait CompletionService {
    /// Generate a reply for `request`, giving up after `timeout`.
    ///
    /// # Errors
    /// [`CopilotError::Timeout`] when the deadline passes,
    /// [`CopilotError::ExternalService`] for any backend failure or empty reply.
    fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Client for an OpenAI-compatible chat completions API.
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model: String,
    stream: bool,
}

impl OpenAiCompletion {
    pub fn new(config: &CopilotConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        debug!("Client created with api base {}", config.api_base);

        // One attempt per call: a 5xx is reported as it happens.
        let no_retry = backoff::ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: Client::with_config(openai_config).with_backoff(no_retry),
            model: config.model.clone(),
            stream: config.stream.unwrap_or(false),
        }
    }

    #[allow(deprecated)]
    fn build_request(&self, request: &CompletionRequest) -> Result<CreateChatCompletionRequest> {
        let messages: Vec<ChatCompletionRequestMessage> =
            request.messages.iter().map(to_openai_message).collect();

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone())
            .messages(messages)
            .max_tokens(request.params.max_tokens)
            .temperature(request.params.temperature);
        if !request.params.stop.is_empty() {
            args.stop(request.params.stop.clone());
        }
        Ok(args.build()?)
    }

    async fn fetch(&self, request: CreateChatCompletionRequest) -> Result<String> {
        let response = self.client.chat().create(request).await?;

        let mut reply = String::new();
        for choice in response.choices {
            if let Some(content) = choice.message.content {
                reply.push_str(&content);
            }
        }
        Ok(reply)
    }

    async fn fetch_streamed(&self, request: CreateChatCompletionRequest) -> Result<String> {
        let mut stream = self.client.chat().create_stream(request).await?;

        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    reply.push_str(&content);
                }
            }
        }
        Ok(reply)
    }
}

impl CompletionService for OpenAiCompletion {
    async fn complete(&self, request: &CompletionRequest, timeout: Duration) -> Result<String> {
        let openai_request = self.build_request(request)?;
        debug!("Sending request: {:?}", openai_request);

        let call = async {
            if self.stream {
                self.fetch_streamed(openai_request).await
            } else {
                self.fetch(openai_request).await
            }
        };

        let reply = match tokio::time::timeout(timeout, call).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!("Completion request timed out after {:?}", timeout);
                return Err(CopilotError::Timeout(timeout));
            }
        };

        if reply.trim().is_empty() {
            return Err(CopilotError::ExternalService(
                "completion service returned an empty reply".into(),
            ));
        }
        Ok(reply)
    }
}

/// Convert a prompt message into the wire type.
#[allow(deprecated)]
fn to_openai_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
    match message.role {
        MessageRole::System => {
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(message.content.clone()),
                name: None,
            })
        }
        MessageRole::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(message.content.clone()),
            name: None,
        }),
        MessageRole::Assistant => {
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                    message.content.clone(),
                )),
                name: None,
                refusal: None,
                audio: None,
                tool_calls: None,
                function_call: None,
            })
        }
    }
}
