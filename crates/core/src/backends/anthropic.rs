use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{build_client, endpoint, send_json, split_system, GenerationBackend};
use super::{MAX_OUTPUT_TOKENS, TEMPERATURE};
use crate::{BackendError, BackendHandle, Message};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    handle: BackendHandle,
    endpoint: Url,
    client: Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a Message>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

impl AnthropicBackend {
    pub fn new(handle: BackendHandle, base_url: &str) -> Result<Self, BackendError> {
        Ok(Self {
            handle,
            endpoint: endpoint(base_url, "messages")?,
            client: build_client()?,
        })
    }

    fn request_body<'a>(&'a self, turns: &'a [Message]) -> MessagesRequest<'a> {
        let (system, messages) = split_system(turns);
        MessagesRequest {
            model: &self.handle.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
            system,
            messages,
        }
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    async fn generate(&self, turns: &[Message]) -> Result<String, BackendError> {
        let provider = self.handle.provider;
        debug!(backend = %self.id(), turns = turns.len(), "anthropic messages request");

        let request = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", &self.handle.credential)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(turns));

        let response: MessagesResponse = send_json(provider, request).await?;
        response
            .content
            .into_iter()
            .find(|block| block.block_type == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| BackendError::EmptyResponse(provider.to_string()))
    }
}
