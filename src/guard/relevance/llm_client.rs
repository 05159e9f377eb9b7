use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{
    page_client::FetchedPage,
    prompt::{parse_verdict, system_prompt, user_prompt},
    Verdict,
};

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Judges whether a page belongs to a task.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, model: &str, task_title: &str, page: &FetchedPage) -> Result<Verdict>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: Role,
    pub content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Client of a local Ollama-compatible chat service.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Checks that the service answers at all. Never fails, an unreachable service just isn't
    /// available.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(AVAILABILITY_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                info!("Language model service at {url} answered {}", response.status());
                false
            }
            Err(e) => {
                info!("Language model service at {url} is not reachable: {e}");
                false
            }
        }
    }

    /// Sends a non-streaming chat and returns the reply text.
    #[instrument(skip(self, messages))]
    pub async fn chat(&self, model: &str, messages: &[ChatMessage<'_>]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&ChatRequest {
                model,
                messages,
                stream: false,
            })
            .send()
            .await
            .with_context(|| format!("Chat request to {url} failed"))?;

        let status = response.status();
        let body = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| anyhow!("Malformed chat response ({status}): {e}"))?;
        if let Some(error) = body.error {
            bail!("Chat service returned an error ({status}): {error}");
        }
        if !status.is_success() {
            bail!("Chat service answered {status}");
        }
        body.message
            .map(|v| v.content)
            .ok_or_else(|| anyhow!("Chat response has no message"))
    }
}

#[async_trait]
impl Classifier for OllamaClient {
    async fn classify(&self, model: &str, task_title: &str, page: &FetchedPage) -> Result<Verdict> {
        let context = user_prompt(task_title, page);
        let messages = [
            ChatMessage {
                role: Role::System,
                content: system_prompt(),
            },
            ChatMessage {
                role: Role::User,
                content: &context,
            },
        ];
        let reply = self.chat(model, &messages).await?;
        debug!("Model replied {reply:?}");
        Ok(parse_verdict(&reply))
    }
}
