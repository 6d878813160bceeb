pub mod anthropic;
pub mod gemini;
pub mod openai;

#[cfg(test)]
pub(crate) mod stub_server;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BackendError, BackendHandle, Message};

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::ChatCompletionsBackend;

pub const TEMPERATURE: f64 = 0.7;
pub const MAX_OUTPUT_TOKENS: u32 = 1024;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Groq,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Groq,
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Gemini,
        Provider::OpenRouter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-sonnet-20241022",
            Self::Gemini => "gemini-1.5-flash",
            Self::OpenRouter => "meta-llama/llama-3.1-8b-instruct:free",
        }
    }

    pub fn credential_env_var(self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .ok_or_else(|| BackendError::UnsupportedProvider(value.to_string()))
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn handle(&self) -> &BackendHandle;

    fn id(&self) -> String {
        self.handle().id()
    }

    async fn generate(&self, turns: &[Message]) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    endpoints: HashMap<Provider, String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, provider: Provider, base_url: impl Into<String>) -> Self {
        self.endpoints.insert(provider, base_url.into());
        self
    }

    pub fn create(
        &self,
        provider_name: &str,
        credential: &str,
        model: &str,
    ) -> Result<Arc<dyn GenerationBackend>, BackendError> {
        let provider: Provider = provider_name.parse()?;
        let model = if model.trim().is_empty() {
            provider.default_model()
        } else {
            model.trim()
        };
        self.create_for(BackendHandle::new(provider, model, credential))
    }

    pub fn create_for(
        &self,
        handle: BackendHandle,
    ) -> Result<Arc<dyn GenerationBackend>, BackendError> {
        let base_url = self
            .endpoints
            .get(&handle.provider)
            .map(String::as_str)
            .unwrap_or_else(|| handle.provider.default_base_url());

        let backend: Arc<dyn GenerationBackend> = match handle.provider {
            Provider::Groq | Provider::OpenAi | Provider::OpenRouter => {
                Arc::new(ChatCompletionsBackend::new(handle, base_url)?)
            }
            Provider::Anthropic => Arc::new(AnthropicBackend::new(handle, base_url)?),
            Provider::Gemini => Arc::new(GeminiBackend::new(handle, base_url)?),
        };

        debug!(backend = %backend.id(), base_url, "generation backend created");
        Ok(backend)
    }
}

pub(crate) fn build_client() -> Result<Client, BackendError> {
    Ok(Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<url::Url, BackendError> {
    Ok(url::Url::parse(&format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))?)
}

pub(crate) fn split_system(turns: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for turn in turns {
        match turn.role {
            crate::Role::System => system.push(turn.content.as_str()),
            _ => rest.push(turn),
        }
    }
    let system = (!system.is_empty()).then(|| system.join("\n"));
    (system, rest)
}

pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: Provider,
    request: RequestBuilder,
) -> Result<T, BackendError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(BackendError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|error| BackendError::Protocol {
        provider: provider.to_string(),
        details: error.to_string(),
    })
}
