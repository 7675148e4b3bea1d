use super::prompt::build_prompt;
use super::provider::{
    replicate_version, AnthropicRequest, ChatMessage, GeminiContent, GeminiPart, GeminiRequest,
    OpenAiRequest, Provider, ProviderConfig, ProviderReply, ReplicateInput, ReplicatePrediction,
    ReplicateRequest,
};
use super::{GenerateError, GeneratedUi};
use crate::code::GeneratedCode;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;
const REPLICATE_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// HTTP client for UI generation. Holds no credentials; every call takes
/// its own [`ProviderConfig`].
#[derive(Debug, Clone, Default)]
pub struct UiGenerator {
    client: Client,
}

impl UiGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        UiGenerator { client }
    }

    /// Generates component code for `user_prompt`, retrying failed attempts
    /// up to `config.max_retries` times.
    pub async fn generate(
        &self,
        config: &ProviderConfig,
        user_prompt: &str,
    ) -> Result<GeneratedUi, GenerateError> {
        if user_prompt.trim().is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        let prompt = build_prompt(config.provider, user_prompt);

        let mut attempt = 0;
        let text = loop {
            let result = match tokio::time::timeout(config.timeout, self.call(config, &prompt)).await {
                Ok(result) => result,
                Err(_) => Err(GenerateError::Timeout(config.timeout.as_millis() as u64)),
            };
            match result {
                Ok(text) => break text,
                Err(err) if attempt < config.max_retries && err.is_retryable() => {
                    attempt += 1;
                    warn!(provider = %config.provider, attempt, error = %err, "generation failed, retrying");
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        let code = GeneratedCode::from_llm_output(&text);
        if code.is_blank() {
            return Err(GenerateError::EmptyResponse(config.provider));
        }
        info!(provider = %config.provider, model = %config.model, bytes = code.len(), "generated UI code");
        Ok(GeneratedUi {
            provider: config.provider,
            model: config.model.clone(),
            code,
        })
    }

    async fn call(&self, config: &ProviderConfig, prompt: &str) -> Result<String, GenerateError> {
        debug!(provider = %config.provider, model = %config.model, "calling provider");
        let reply = match config.provider {
            Provider::Gemini => {
                let request = GeminiRequest {
                    contents: vec![GeminiContent {
                        parts: vec![GeminiPart {
                            text: prompt.to_string(),
                        }],
                    }],
                };
                let builder = self
                    .client
                    .post(format!("{}/models/{}:generateContent", config.base_url, config.model))
                    .header("x-goog-api-key", &config.api_key)
                    .json(&request);
                self.send(config.provider, builder).await?
            }
            Provider::Claude => {
                let request = AnthropicRequest {
                    model: config.model.clone(),
                    max_tokens: ANTHROPIC_MAX_TOKENS,
                    messages: vec![ChatMessage::user(prompt)],
                };
                let builder = self
                    .client
                    .post(format!("{}/messages", config.base_url))
                    .header("x-api-key", &config.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&request);
                self.send(config.provider, builder).await?
            }
            Provider::Gpt => {
                let request = OpenAiRequest {
                    model: config.model.clone(),
                    messages: vec![ChatMessage::user(prompt)],
                };
                let builder = self
                    .client
                    .post(format!("{}/chat/completions", config.base_url))
                    .bearer_auth(&config.api_key)
                    .json(&request);
                self.send(config.provider, builder).await?
            }
            Provider::Llama => self.run_prediction(config, prompt).await?,
        };
        reply
            .text()
            .ok_or(GenerateError::EmptyResponse(config.provider))
    }

    /// Creates a Replicate prediction and polls it until it finishes.
    async fn run_prediction(
        &self,
        config: &ProviderConfig,
        prompt: &str,
    ) -> Result<ProviderReply, GenerateError> {
        let request = ReplicateRequest {
            version: replicate_version(&config.model).to_string(),
            input: ReplicateInput::new(prompt.to_string()),
        };
        let builder = self
            .client
            .post(format!("{}/predictions", config.base_url))
            .bearer_auth(&config.api_key)
            .header("Prefer", "wait")
            .json(&request);
        let mut reply = self.send(config.provider, builder).await?;

        loop {
            let ProviderReply::Replicate(prediction) = &reply else {
                return Ok(reply);
            };
            if prediction.is_finished() {
                return finished_prediction(reply);
            }
            let Some(poll_url) = prediction.urls.as_ref().map(|u| u.get.clone()) else {
                return Err(GenerateError::EmptyResponse(Provider::Llama));
            };
            debug!(prediction = %prediction.id, status = %prediction.status, "waiting for prediction");
            tokio::time::sleep(REPLICATE_POLL_INTERVAL).await;
            let builder = self.client.get(poll_url).bearer_auth(&config.api_key);
            reply = self.send(config.provider, builder).await?;
        }
    }

    async fn send(
        &self,
        provider: Provider,
        builder: RequestBuilder,
    ) -> Result<ProviderReply, GenerateError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GenerateError::Api {
                provider,
                status: status.as_u16(),
                body,
            });
        }
        ProviderReply::parse(provider, &body)
    }
}

fn finished_prediction(reply: ProviderReply) -> Result<ProviderReply, GenerateError> {
    if let ProviderReply::Replicate(ReplicatePrediction { status, error, .. }) = &reply {
        if status != "succeeded" {
            let detail = error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("prediction {}", status));
            return Err(GenerateError::Api {
                provider: Provider::Llama,
                status: 500,
                body: detail,
            });
        }
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves canned HTTP responses in order, one per connection.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 64 * 1024];
                let _ = socket.read(&mut buf).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}", addr), hits)
    }

    fn config(provider: Provider, base_url: &str) -> ProviderConfig {
        let settings = GeneratorSettings {
            retry_delay_ms: 10,
            timeout_ms: 5_000,
            ..GeneratorSettings::default()
        };
        ProviderConfig::from_lookup(provider, &settings, |_| Some("test-key".to_string()))
            .unwrap()
            .with_base_url(base_url)
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_request() {
        let err = UiGenerator::new()
            .generate(&config(Provider::Gpt, "http://127.0.0.1:9"), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::EmptyPrompt));
    }

    #[tokio::test]
    async fn test_openai_code_is_cleaned() {
        let (url, _) = serve(vec![(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"```jsx\n<div className=\"p-4\">Hi</div>\n```"}}]}"#,
        )])
        .await;
        let ui = UiGenerator::new()
            .generate(&config(Provider::Gpt, &url), "a greeting")
            .await
            .unwrap();
        assert_eq!(ui.code.as_str(), r#"<div className="p-4">Hi</div>"#);
        assert_eq!(ui.model, "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_retries_once_after_server_error() {
        let (url, hits) = serve(vec![
            (503, r#"{"error":"overloaded"}"#),
            (200, r#"{"content":[{"type":"text","text":"<p>ok</p>"}]}"#),
        ])
        .await;
        let ui = UiGenerator::new()
            .generate(&config(Provider::Claude, &url), "status")
            .await
            .unwrap();
        assert_eq!(ui.code.as_str(), "<p>ok</p>");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, hits) = serve(vec![(401, r#"{"error":"bad key"}"#)]).await;
        let err = UiGenerator::new()
            .generate(&config(Provider::Gemini, &url), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Api { status: 401, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replicate_failed_prediction() {
        let (url, _) = serve(vec![(
            201,
            r#"{"id":"p1","status":"failed","error":"model crashed"}"#,
        )])
        .await;
        let mut cfg = config(Provider::Llama, &url);
        cfg.max_retries = 0;
        let err = UiGenerator::new().generate(&cfg, "x").await.unwrap_err();
        assert!(err.to_string().contains("model crashed"));
    }
}
