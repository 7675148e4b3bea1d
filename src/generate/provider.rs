//! Provider identities, per-request configuration, and the request and
//! response shapes of each provider API.

use super::GenerateError;
use crate::config::GeneratorSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const LLAMA_DEFAULT_MODEL: &str =
    "meta/llama-2-70b-chat:02e509c789964a7ea8736978a43525956ef40397be9033abf9fd2badfe68c9e3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Claude,
    Gpt,
    Llama,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Gemini,
        Provider::Claude,
        Provider::Gpt,
        Provider::Llama,
    ];

    pub fn env_key(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::Gpt => "OPENAI_API_KEY",
            Provider::Llama => "REPLICATE_API_TOKEN",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-1.5-flash",
            Provider::Claude => "claude-3-5-sonnet-latest",
            Provider::Gpt => "gpt-3.5-turbo",
            Provider::Llama => LLAMA_DEFAULT_MODEL,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Claude => "https://api.anthropic.com/v1",
            Provider::Gpt => "https://api.openai.com/v1",
            Provider::Llama => "https://api.replicate.com/v1",
        }
    }

    fn configured_model(self, settings: &GeneratorSettings) -> Option<&str> {
        match self {
            Provider::Gemini => settings.gemini_model.as_deref(),
            Provider::Claude => settings.claude_model.as_deref(),
            Provider::Gpt => settings.gpt_model.as_deref(),
            Provider::Llama => settings.llama_model.as_deref(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::Gemini => "gemini",
            Provider::Claude => "claude",
            Provider::Gpt => "gpt",
            Provider::Llama => "llama",
        })
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "claude" | "anthropic" => Ok(Provider::Claude),
            "gpt" | "openai" => Ok(Provider::Gpt),
            "llama" | "replicate" => Ok(Provider::Llama),
            other => Err(format!(
                "unknown provider '{}' (expected gemini, claude, gpt or llama)",
                other
            )),
        }
    }
}

/// Everything one generation request needs.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ProviderConfig {
    pub fn from_env(provider: Provider, settings: &GeneratorSettings) -> Result<Self, GenerateError> {
        Self::from_lookup(provider, settings, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(
        provider: Provider,
        settings: &GeneratorSettings,
        lookup: F,
    ) -> Result<Self, GenerateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(provider.env_key())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(GenerateError::MissingCredentials {
                provider,
                env: provider.env_key(),
            })?;
        Ok(ProviderConfig {
            provider,
            api_key,
            model: provider
                .configured_model(settings)
                .unwrap_or(provider.default_model())
                .to_string(),
            base_url: provider.default_base_url().to_string(),
            timeout: Duration::from_millis(settings.timeout_ms),
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

// Gemini

#[derive(Debug, Serialize)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GeminiContent {
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: GeminiContent,
}

// Anthropic

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

// OpenAI

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: Some(content.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    pub message: ChatMessage,
}

// Replicate

#[derive(Debug, Serialize)]
pub struct ReplicateRequest {
    pub version: String,
    pub input: ReplicateInput,
}

#[derive(Debug, Serialize)]
pub struct ReplicateInput {
    pub prompt: String,
    pub max_length: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl ReplicateInput {
    pub fn new(prompt: String) -> Self {
        ReplicateInput {
            prompt,
            max_length: 500,
            temperature: 0.75,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplicatePrediction {
    #[serde(default)]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<ReplicateOutput>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub urls: Option<ReplicateUrls>,
}

impl ReplicatePrediction {
    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplicateUrls {
    pub get: String,
}

/// Streaming models return token chunks; others return one string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReplicateOutput {
    Text(String),
    Chunks(Vec<String>),
}

/// `owner/name:version` → `version`; a bare version is returned as is.
pub fn replicate_version(model: &str) -> &str {
    model.rsplit_once(':').map(|(_, v)| v).unwrap_or(model)
}

/// A parsed provider response.
#[derive(Debug)]
pub enum ProviderReply {
    Gemini(GeminiResponse),
    Anthropic(AnthropicResponse),
    OpenAi(OpenAiResponse),
    Replicate(ReplicatePrediction),
}

impl ProviderReply {
    pub fn parse(provider: Provider, body: &str) -> Result<Self, GenerateError> {
        let decode = |e: serde_json::Error| GenerateError::Decode {
            provider,
            detail: e.to_string(),
        };
        Ok(match provider {
            Provider::Gemini => ProviderReply::Gemini(serde_json::from_str(body).map_err(decode)?),
            Provider::Claude => ProviderReply::Anthropic(serde_json::from_str(body).map_err(decode)?),
            Provider::Gpt => ProviderReply::OpenAi(serde_json::from_str(body).map_err(decode)?),
            Provider::Llama => ProviderReply::Replicate(serde_json::from_str(body).map_err(decode)?),
        })
    }

    /// Generated text, if the response carries any.
    pub fn text(&self) -> Option<String> {
        let text = match self {
            ProviderReply::Gemini(r) => r
                .candidates
                .first()
                .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect::<String>()),
            ProviderReply::Anthropic(r) => Some(
                r.content
                    .iter()
                    .filter(|b| b.kind == "text")
                    .map(|b| b.text.as_str())
                    .collect::<String>(),
            ),
            ProviderReply::OpenAi(r) => r.choices.first().and_then(|c| c.message.content.clone()),
            ProviderReply::Replicate(p) => match &p.output {
                Some(ReplicateOutput::Text(s)) => Some(s.clone()),
                Some(ReplicateOutput::Chunks(chunks)) => Some(chunks.concat()),
                None => None,
            },
        };
        text.filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup(key: &str) -> Option<String> {
        match key {
            "ANTHROPIC_API_KEY" => Some(" sk-test ".to_string()),
            "OPENAI_API_KEY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("Claude".parse::<Provider>().unwrap(), Provider::Claude);
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::Gpt);
        assert!("bard".parse::<Provider>().is_err());
        for p in Provider::ALL {
            assert_eq!(p.to_string().parse::<Provider>().unwrap(), p);
        }
    }

    #[test]
    fn test_config_from_lookup() {
        let settings = GeneratorSettings::default();
        let config = ProviderConfig::from_lookup(Provider::Claude, &settings, lookup).unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "claude-3-5-sonnet-latest");
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.max_retries, 1);
        assert!(!format!("{:?}", config).contains("sk-test"));
    }

    #[test]
    fn test_missing_or_blank_key() {
        let settings = GeneratorSettings::default();
        for provider in [Provider::Gpt, Provider::Gemini] {
            let err = ProviderConfig::from_lookup(provider, &settings, lookup).unwrap_err();
            assert!(matches!(err, GenerateError::MissingCredentials { .. }));
        }
    }

    #[test]
    fn test_model_override() {
        let settings = GeneratorSettings {
            claude_model: Some("claude-3-haiku-20240307".to_string()),
            ..GeneratorSettings::default()
        };
        let config = ProviderConfig::from_lookup(Provider::Claude, &settings, lookup).unwrap();
        assert_eq!(config.model, "claude-3-haiku-20240307");
    }

    #[test]
    fn test_replicate_version() {
        assert_eq!(
            replicate_version(LLAMA_DEFAULT_MODEL),
            "02e509c789964a7ea8736978a43525956ef40397be9033abf9fd2badfe68c9e3"
        );
        assert_eq!(replicate_version("abc123"), "abc123");
    }

    #[test]
    fn test_gemini_reply() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"<div>"},{"text":"</div>"}],"role":"model"}}]}"#;
        let reply = ProviderReply::parse(Provider::Gemini, body).unwrap();
        assert_eq!(reply.text().as_deref(), Some("<div></div>"));
    }

    #[test]
    fn test_anthropic_reply_skips_non_text_blocks() {
        let body = r#"{"id":"msg_1","content":[{"type":"tool_use","id":"t"},{"type":"text","text":"<p>hi</p>"}]}"#;
        let reply = ProviderReply::parse(Provider::Claude, body).unwrap();
        assert_eq!(reply.text().as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn test_openai_reply() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"<main/>"}}]}"#;
        let reply = ProviderReply::parse(Provider::Gpt, body).unwrap();
        assert_eq!(reply.text().as_deref(), Some("<main/>"));
    }

    #[test]
    fn test_replicate_chunked_output() {
        let body = r#"{"id":"p1","status":"succeeded","output":["<di","v/>"]}"#;
        let reply = ProviderReply::parse(Provider::Llama, body).unwrap();
        assert_eq!(reply.text().as_deref(), Some("<div/>"));
    }

    #[test]
    fn test_empty_reply_has_no_text() {
        let reply = ProviderReply::parse(Provider::Gpt, r#"{"choices":[]}"#).unwrap();
        assert_eq!(reply.text(), None);
    }

    #[test]
    fn test_malformed_reply() {
        let err = ProviderReply::parse(Provider::Gemini, "<html>").unwrap_err();
        assert!(matches!(err, GenerateError::Decode { .. }));
    }
}
