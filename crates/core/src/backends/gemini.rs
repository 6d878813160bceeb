use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{build_client, endpoint, send_json, split_system, GenerationBackend};
use super::{MAX_OUTPUT_TOKENS, TEMPERATURE};
use crate::{BackendError, BackendHandle, Message, Role};

pub struct GeminiBackend {
    handle: BackendHandle,
    endpoint: Url,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

impl GeminiBackend {
    pub fn new(handle: BackendHandle, base_url: &str) -> Result<Self, BackendError> {
        let path = format!("models/{}:generateContent", handle.model);
        Ok(Self {
            endpoint: endpoint(base_url, &path)?,
            handle,
            client: build_client()?,
        })
    }

    fn request_body<'a>(
        &self,
        system: Option<&'a str>,
        turns: &[&'a Message],
    ) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: turns
                .iter()
                .copied()
                .map(|turn| Content {
                    role: Some(wire_role(turn.role)),
                    parts: vec![Part {
                        text: turn.content.as_str(),
                    }],
                })
                .collect(),
            system_instruction: system.map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    async fn generate(&self, turns: &[Message]) -> Result<String, BackendError> {
        let provider = self.handle.provider;
        debug!(backend = %self.id(), turns = turns.len(), "gemini generateContent request");

        let (system, rest) = split_system(turns);
        let body = self.request_body(system.as_deref(), &rest);
        let request = self
            .client
            .post(self.endpoint.clone())
            .header("X-Goog-Api-Key", &self.handle.credential)
            .json(&body);

        let response: GenerateContentResponse = send_json(provider, request).await?;
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| BackendError::EmptyResponse(provider.to_string()))
    }
}
