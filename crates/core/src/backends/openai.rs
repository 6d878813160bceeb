use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{build_client, endpoint, send_json, GenerationBackend, Provider};
use super::{MAX_OUTPUT_TOKENS, TEMPERATURE};
use crate::{BackendError, BackendHandle, Message};

const OPENROUTER_REFERER: &str = "https://crates.io/crates/rag-chat-core";
const OPENROUTER_TITLE: &str = "rag-chat";

pub struct ChatCompletionsBackend {
    handle: BackendHandle,
    endpoint: Url,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsBackend {
    pub fn new(handle: BackendHandle, base_url: &str) -> Result<Self, BackendError> {
        Ok(Self {
            handle,
            endpoint: endpoint(base_url, "chat/completions")?,
            client: build_client()?,
        })
    }

    fn request_body<'a>(&'a self, turns: &'a [Message]) -> ChatCompletionsRequest<'a> {
        ChatCompletionsRequest {
            model: &self.handle.model,
            messages: turns,
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

#[async_trait]
impl GenerationBackend for ChatCompletionsBackend {
    fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    async fn generate(&self, turns: &[Message]) -> Result<String, BackendError> {
        let provider = self.handle.provider;
        debug!(backend = %self.id(), turns = turns.len(), "chat completion request");

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.handle.credential)
            .json(&self.request_body(turns));

        if provider == Provider::OpenRouter {
            request = request
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE);
        }

        let response: ChatCompletionsResponse = send_json(provider, request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| BackendError::EmptyResponse(provider.to_string()))
    }
}
