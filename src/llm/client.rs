use crate::error::{GenError, Result};
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const API_KEY_VARS: [&str; 2] = ["COVGEN_API_KEY", "OPENAI_API_KEY"];

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

/// A system/user message pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ModelResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, prompt: &Prompt, max_tokens: u32) -> Result<ModelResponse>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Client for OpenAI-compatible `chat/completions` endpoints
pub struct ChatClient {
    http: reqwest::Client,
    model: String,
    api_base: String,
    api_version: Option<String>,
    api_key: String,
    session_id: String,
}

impl ChatClient {
    pub fn new(
        model: impl Into<String>,
        api_base: Option<&str>,
        api_version: Option<&str>,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                GenError::Config(format!(
                    "no API key found; set {} or {}",
                    API_KEY_VARS[0], API_KEY_VARS[1]
                ))
            })?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GenError::Model(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            model: model.into(),
            api_base: api_base
                .filter(|b| !b.trim().is_empty())
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            api_version: api_version
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string),
            api_key,
            session_id: session_id.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

/// Extract a retry-after hint like "retry after 12 seconds" from an error body
fn parse_retry_after(text: &str) -> Option<u64> {
    let lower = text.to_lowercase();
    let pos = lower.find("retry")?;
    lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|w| w.trim_matches(|c: char| !c.is_ascii_digit()).parse::<u64>().ok())
        .find(|secs| *secs > 0 && *secs < 300)
}

fn backoff_secs(retry: u32) -> u64 {
    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry.saturating_sub(1))) / 1000
}

#[async_trait::async_trait]
impl ModelClient for ChatClient {
    async fn call(&self, prompt: &Prompt, max_tokens: u32) -> Result<ModelResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens,
            temperature: 0.2,
            stream: false,
        };

        let mut retry = 0;
        loop {
            let mut builder = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .header("X-Session-Id", &self.session_id)
                .json(&request);
            if let Some(version) = &self.api_version {
                builder = builder.query(&[("api-version", version.as_str())]);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| GenError::Model(format!("request failed: {}", e)))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| GenError::Model(format!("failed to read response body: {}", e)))?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    GenError::Model(format!(
                        "unexpected response format ({}): {}",
                        e,
                        truncate(&text, 200)
                    ))
                })?;
                let usage = parsed.usage.unwrap_or_default();
                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                return Ok(ModelResponse {
                    content,
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                });
            }

            if status.as_u16() == 429 && retry < MAX_RETRIES {
                retry += 1;
                let wait = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry));
                tracing::warn!(
                    wait_secs = wait,
                    attempt = retry,
                    max = MAX_RETRIES,
                    "model API rate limited, retrying"
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let message = match status.as_u16() {
                401 | 403 => "the API key was rejected".to_string(),
                429 => format!("rate limited after {} retries", retry),
                500..=599 => format!("server error ({})", status),
                _ => format!("API error {}: {}", status, truncate(&text, 200)),
            };
            return Err(GenError::Model(message));
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
