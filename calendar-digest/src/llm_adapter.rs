use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::Secret;
use crate::sources::endpoint;
use crate::types::{LlmBackend, SummarizationError};

pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro-latest";

const GEMINI_TIMEOUT_SECS: u64 = 120;

/// Google Gemini `generateContent` backend.
pub struct GeminiBackend {
    client: Client,
    base_url: Url,
    model: String,
    api_key: Secret,
}

impl GeminiBackend {
    pub fn new(api_key: Secret) -> Result<Self, SummarizationError> {
        let base_url = Url::parse(DEFAULT_GEMINI_BASE)
            .map_err(|e| SummarizationError::Backend(e.to_string()))?;
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: Secret, base_url: Url) -> Result<Self, SummarizationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GEMINI_TIMEOUT_SECS))
            .build()
            .map_err(|e| SummarizationError::Backend(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
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

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn backend_name(&self) -> String {
        format!("Gemini ({})", self.model)
    }

    async fn generate(&self, prompt: &str) -> Result<String, SummarizationError> {
        let action = format!("{}:generateContent", self.model);
        let url = endpoint(&self.base_url, &["v1beta", "models", &action])
            .map_err(SummarizationError::Backend)?;

        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        debug!("Sending {} character prompt to {}", prompt.len(), self.backend_name());
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.expose())])
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizationError::Backend(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SummarizationError::Backend(format!(
                "backend returned {}: {}",
                status, detail
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SummarizationError::Backend(format!("invalid response: {}", e)))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(SummarizationError::EmptyResponse);
        }
        info!("Received {} character summary from {}", text.len(), self.backend_name());
        Ok(text)
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Outline,
    Fixed(String),
    Fail(String),
}

/// Offline backend for development and tests. Counts calls and keeps the
/// prompts it was given.
pub struct MockLlmBackend {
    reply: MockReply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmBackend {
    /// Replies with a bullet list of the item titles found in the prompt.
    pub fn new() -> Self {
        Self::with_reply(MockReply::Outline)
    }

    pub fn with_response(text: impl Into<String>) -> Self {
        Self::with_reply(MockReply::Fixed(text.into()))
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with_reply(MockReply::Fail(reason.into()))
    }

    fn with_reply(reply: MockReply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok().and_then(|prompts| prompts.last().cloned())
    }
}

impl Default for MockLlmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    fn backend_name(&self) -> String {
        "Mock".to_string()
    }

    async fn generate(&self, prompt: &str) -> Result<String, SummarizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        match &self.reply {
            MockReply::Fixed(text) => Ok(text.clone()),
            MockReply::Fail(reason) => Err(SummarizationError::Backend(reason.clone())),
            MockReply::Outline => {
                let titles: Vec<String> = prompt
                    .lines()
                    .filter_map(|line| line.strip_prefix("Title: "))
                    .map(|title| format!("- {}", title))
                    .collect();
                Ok(format!(
                    "## Offline Summary\n\n{} item(s) in this period.\n\n{}",
                    titles.len(),
                    titles.join("\n")
                ))
            }
        }
    }
}
