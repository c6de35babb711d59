//! Provider specific [`ClientWrapper`](crate::client_wrapper::ClientWrapper) implementations.
//!
//! Each submodule offers a concrete client that speaks a particular vendor's API while
//! conforming to the uniform streaming contract. [`ProviderFactory`] picks one of them per
//! relay request.

pub mod common;

pub mod claude;
pub mod openai;

use crate::client_wrapper::{ClientFactory, ClientWrapper};
use crate::config::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Upstream API family the relay talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    /// Anthropic Messages API (`/v1/messages`).
    #[default]
    Anthropic,
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAI,
}

impl Provider {
    /// Environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAI),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::OpenAI => write!(f, "openai"),
        }
    }
}

/// [`ClientFactory`] backed by the real provider clients.
#[derive(Clone, Debug)]
pub struct ProviderFactory {
    provider: Provider,
    api_key: String,
    base_url: Option<String>,
}

impl ProviderFactory {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
        }
    }

    /// Point the clients at a compatible proxy or self-hosted deployment.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

impl ClientFactory for ProviderFactory {
    fn client_for(&self, model_name: &str) -> Arc<dyn ClientWrapper> {
        match (self.provider, self.base_url.as_deref()) {
            (Provider::Anthropic, None) => {
                Arc::new(claude::ClaudeClient::new_with_model_str(&self.api_key, model_name))
            }
            (Provider::Anthropic, Some(url)) => Arc::new(claude::ClaudeClient::new_with_base_url(
                &self.api_key,
                model_name,
                url,
            )),
            (Provider::OpenAI, None) => Arc::new(openai::OpenAIClient::new_with_model_string(
                &self.api_key,
                model_name,
            )),
            (Provider::OpenAI, Some(url)) => Arc::new(openai::OpenAIClient::new_with_base_url(
                &self.api_key,
                model_name,
                url,
            )),
        }
    }
}
