//! Reads the visible content of a browser tab through the browser's remote debugging protocol.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, instrument};

/// Upper bound for the text taken from a page.
pub const MAX_PAGE_TEXT_CHARS: usize = 8000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const EVALUATE_ID: u64 = 1;

const PAGE_EXPRESSION: &str = "(() => {
    const body = document.body ? (document.body.innerText || '') : '';
    return {
        title: document.title || '',
        url: location.href || '',
        text: body.replace(/\\s+/g, ' ').trim().slice(0, 8000),
    };
})()";

const BROWSER_NAMES: [&str; 7] = [
    "chromium",
    "google chrome",
    "chrome",
    "brave",
    "microsoft edge",
    "vivaldi",
    "browser",
];
const TITLE_SEPARATORS: [&str; 3] = [" - ", " – ", " — "];

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct FetchedPage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
}

/// Entry of `GET /json/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTarget {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

impl DebugTarget {
    fn socket_url(&self) -> Option<&str> {
        if self.kind != "page" {
            return None;
        }
        self.web_socket_debugger_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

/// Source of page content for the tab shown in a browser window.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, window_title: &str) -> Result<FetchedPage>;
}

/// Lower-cases a title and removes the browser name browsers append to window titles.
pub fn normalize_title(title: &str) -> String {
    let mut title = title.trim().to_lowercase();
    'outer: loop {
        for separator in TITLE_SEPARATORS {
            for name in BROWSER_NAMES {
                let suffix = format!("{separator}{name}");
                if let Some(stripped) = title.strip_suffix(&suffix) {
                    title = stripped.trim_end().to_string();
                    continue 'outer;
                }
            }
        }
        return title;
    }
}

/// Picks the tab shown in the window: exact title match first, then a title containing the
/// other, then any page that can be debugged.
pub fn select_target<'a>(targets: &'a [DebugTarget], window_title: &str) -> Option<&'a DebugTarget> {
    let wanted = normalize_title(window_title);
    let eligible = targets
        .iter()
        .filter(|v| v.socket_url().is_some())
        .collect::<Vec<_>>();

    let score = |target: &DebugTarget| {
        let title = normalize_title(&target.title);
        if title == wanted {
            2
        } else if !title.is_empty()
            && !wanted.is_empty()
            && (title.contains(&wanted) || wanted.contains(&title))
        {
            1
        } else {
            0
        }
    };

    let mut best: Option<(&DebugTarget, i32)> = None;
    for target in eligible {
        let target_score = score(target);
        if best.map_or(true, |(_, best_score)| target_score > best_score) {
            best = Some((target, target_score));
        }
    }
    best.map(|(target, _)| target)
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    id: u64,
    method: &'a str,
    params: EvaluateParams<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateParams<'a> {
    expression: &'a str,
    return_by_value: bool,
}

#[derive(Deserialize)]
struct EvaluateResponse {
    #[serde(default)]
    result: Option<EvaluateResult>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResult {
    #[serde(default)]
    result: Option<RemoteObject>,
    #[serde(default)]
    exception_details: Option<Value>,
}

#[derive(Deserialize)]
struct RemoteObject {
    #[serde(default)]
    value: Option<FetchedPage>,
}

impl EvaluateResponse {
    fn into_page(self) -> Result<FetchedPage> {
        if let Some(error) = self.error {
            bail!("Debug protocol returned an error {error}");
        }
        let result = self
            .result
            .ok_or_else(|| anyhow!("Debug protocol response has no result"))?;
        if let Some(exception) = result.exception_details {
            bail!("Page expression threw {exception}");
        }
        let mut page = result
            .result
            .and_then(|v| v.value)
            .ok_or_else(|| anyhow!("Page expression returned no value"))?;
        if page.text.chars().count() > MAX_PAGE_TEXT_CHARS {
            page.text = page.text.chars().take(MAX_PAGE_TEXT_CHARS).collect();
        }
        Ok(page)
    }
}

pub struct DebugPageClient {
    http: reqwest::Client,
    port: u16,
    timeout: Duration,
}

impl DebugPageClient {
    pub fn new(port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds both the target listing and the socket exchange.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub async fn list_targets(&self) -> Result<Vec<DebugTarget>> {
        let url = format!("http://127.0.0.1:{}/json/list", self.port);
        let targets = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Debug endpoint {url} is not reachable"))?
            .error_for_status()?
            .json::<Vec<DebugTarget>>()
            .await?;
        Ok(targets)
    }

    async fn evaluate(&self, socket_url: &str) -> Result<FetchedPage> {
        tokio::time::timeout(self.timeout, evaluate_page(socket_url))
            .await
            .map_err(|_| anyhow!("Timed out waiting for page content"))?
    }
}

/// Sends a single evaluate request and waits for its response.
async fn evaluate_page(socket_url: &str) -> Result<FetchedPage> {
    let (mut socket, _) = connect_async(socket_url)
        .await
        .with_context(|| format!("Failed to connect to {socket_url}"))?;

    let request = serde_json::to_string(&EvaluateRequest {
        id: EVALUATE_ID,
        method: "Runtime.evaluate",
        params: EvaluateParams {
            expression: PAGE_EXPRESSION,
            return_by_value: true,
        },
    })?;
    socket.send(Message::Text(request)).await?;

    let result = loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                let value = match serde_json::from_str::<Value>(&text) {
                    Ok(value) => value,
                    Err(e) => break Err(anyhow!("Malformed debug protocol frame {e}")),
                };
                // Anything without our id is an unrelated protocol event.
                if value.get("id").and_then(Value::as_u64) != Some(EVALUATE_ID) {
                    continue;
                }
                break serde_json::from_value::<EvaluateResponse>(value)
                    .map_err(|e| anyhow!("Unexpected debug protocol response {e}"))
                    .and_then(EvaluateResponse::into_page);
            }
            Some(Ok(Message::Close(_))) | None => {
                break Err(anyhow!("Debug socket closed before responding"))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Err(e.into()),
        }
    };

    let _ = socket.close(None).await;
    result
}

#[async_trait]
impl PageFetcher for DebugPageClient {
    #[instrument(skip(self))]
    async fn fetch(&self, window_title: &str) -> Result<FetchedPage> {
        let targets = self.list_targets().await?;
        let target = select_target(&targets, window_title)
            .ok_or_else(|| anyhow!("Debuggable page not found"))?;
        debug!("Reading page {:?}", target.title);
        let socket_url = target
            .socket_url()
            .ok_or_else(|| anyhow!("Debuggable page not found"))?;
        self.evaluate(socket_url).await
    }
}
