//! UI generation client: turns a user prompt into [`GeneratedCode`] using
//! one of the supported LLM providers.

mod client;
mod prompt;
mod provider;

pub use client::UiGenerator;
pub use prompt::build_prompt;
pub use provider::{Provider, ProviderConfig, ProviderReply, LLAMA_DEFAULT_MODEL};

use crate::code::GeneratedCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Missing user prompt in request body!")]
    EmptyPrompt,

    #[error("Missing {provider} credentials: set {env}")]
    MissingCredentials {
        provider: Provider,
        env: &'static str,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {provider} response: {detail}")]
    Decode { provider: Provider, detail: String },

    #[error("{0} returned no code")]
    EmptyResponse(Provider),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),
}

impl GenerateError {
    /// HTTP status an API route would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GenerateError::EmptyPrompt => 400,
            _ => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GenerateError::EmptyPrompt | GenerateError::MissingCredentials { .. } => false,
            GenerateError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => true,
        }
    }
}

/// A cleaned generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedUi {
    pub provider: Provider,
    pub model: String,
    pub code: GeneratedCode,
}

/// Body returned to callers of the generation endpoint: `{"code": ...}` or
/// `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateResponse {
    Code { code: GeneratedCode },
    Error { error: String },
}

impl From<&Result<GeneratedUi, GenerateError>> for GenerateResponse {
    fn from(result: &Result<GeneratedUi, GenerateError>) -> Self {
        match result {
            Ok(ui) => GenerateResponse::Code {
                code: ui.code.clone(),
            },
            Err(err) => GenerateResponse::Error {
                error: err.to_string(),
            },
        }
    }
}
