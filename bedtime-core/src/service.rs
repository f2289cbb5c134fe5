//! Generation service abstraction.
//!
//! Every stage reaches the text-generation backend through
//! [`GenerationService`]. Plain-text replies come back as `String`;
//! structured replies are parsed into a [`Reply`], so each stage applies its
//! own fallback on the `Malformed` branch instead of raising.

use async_trait::async_trait;
use claude::{Claude, Message, Request};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;

/// Failures of the generation service itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Generation service not configured: {0}")]
    NotConfigured(String),

    #[error("Call budget of {limit} exhausted")]
    BudgetExhausted { limit: usize },
}

impl From<claude::Error> for ServiceError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::NoApiKey => ServiceError::NotConfigured("ANTHROPIC_API_KEY not set".into()),
            claude::Error::Config(msg) => ServiceError::NotConfigured(msg),
            claude::Error::Network(msg) => ServiceError::Network(msg),
            claude::Error::Timeout => ServiceError::Timeout,
            claude::Error::Api { status: 429, message } => ServiceError::Quota(message),
            claude::Error::Api { status: 408 | 504, .. } => ServiceError::Timeout,
            claude::Error::Api { status, message } => ServiceError::Api { status, message },
            claude::Error::Parse(msg) => ServiceError::Api {
                status: 200,
                message: format!("unreadable response envelope: {msg}"),
            },
        }
    }
}

/// Which pipeline stage issued a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptRole {
    Categorizer,
    Names,
    Planner,
    PlanJudge,
    Storyteller,
    Judge,
    Refiner,
}

impl PromptRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptRole::Categorizer => "categorizer",
            PromptRole::Names => "names",
            PromptRole::Planner => "planner",
            PromptRole::PlanJudge => "plan_judge",
            PromptRole::Storyteller => "storyteller",
            PromptRole::Judge => "judge",
            PromptRole::Refiner => "refiner",
        }
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to the generation service.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub role: PromptRole,
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Prompt {
    /// Create a prompt with neutral sampling settings.
    pub fn new(role: PromptRole, user: impl Into<String>) -> Self {
        Self {
            role,
            system: None,
            user: user.into(),
            temperature: 0.5,
            max_tokens: 800,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The text-generation capability consumed by every stage.
///
/// One call to [`complete`](GenerationService::complete) is one unit of
/// call budget. Implementations report transport, quota and timeout
/// problems as [`ServiceError`]; they never panic on bad output.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Execute a prompt and return the raw reply text.
    async fn complete(&self, prompt: &Prompt) -> Result<String, ServiceError>;
}

/// A structured reply from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    /// The reply parsed into the expected shape.
    Parsed(T),
    /// The raw text, when it could not be parsed.
    Malformed(String),
}

impl<T: DeserializeOwned> Reply<T> {
    /// Parse raw reply text, tolerating markdown code fences and chatter
    /// around the JSON body.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str(extract_json(raw)) {
            Ok(value) => Reply::Parsed(value),
            Err(_) => Reply::Malformed(raw.to_string()),
        }
    }
}

impl<T> Reply<T> {
    /// The parsed value, discarding malformed text.
    pub fn parsed(self) -> Option<T> {
        match self {
            Reply::Parsed(value) => Some(value),
            Reply::Malformed(_) => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Reply::Malformed(_))
    }
}

/// Extract JSON from a response that might have markdown code blocks.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // ``` ... ``` blocks without a language tag
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Prose around a bare JSON value: keep the outermost object or array
    let open = text.find(['{', '[']);
    let close = text.rfind(['}', ']']);
    match (open, close) {
        (Some(open), Some(close)) if open < close => &text[open..=close],
        _ => text,
    }
}

/// [`GenerationService`] backed by the Claude Messages API.
#[derive(Clone)]
pub struct ClaudeService {
    client: Claude,
}

impl ClaudeService {
    pub fn new(client: Claude) -> Self {
        Self { client }
    }

    /// Create from environment (ANTHROPIC_API_KEY).
    pub fn from_env() -> Result<Self, ServiceError> {
        Ok(Self::new(Claude::from_env()?))
    }

    /// Use a specific model for every stage.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.client = self.client.with_model(model);
        self
    }
}

#[async_trait]
impl GenerationService for ClaudeService {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ServiceError> {
        let mut request = Request::new(vec![Message::user(&prompt.user)])
            .with_max_tokens(prompt.max_tokens)
            .with_temperature(prompt.temperature);

        if let Some(ref system) = prompt.system {
            request = request.with_system(system);
        }

        let response = self.client.complete(request).await?;
        Ok(response.text().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        category: String,
    }

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"category": "animal"}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_extract_json_markdown() {
        let text = "```json\n{\"category\": \"magic\"}\n```";
        assert_eq!(extract_json(text), "{\"category\": \"magic\"}");
    }

    #[test]
    fn test_extract_json_markdown_no_specifier() {
        let text = "```\n[1, 2]\n```";
        assert_eq!(extract_json(text), "[1, 2]");
    }

    #[test]
    fn test_extract_json_with_surrounding_prose() {
        let text = "Sure! Here you go: {\"category\": \"family\"} Hope that helps.";
        assert_eq!(extract_json(text), "{\"category\": \"family\"}");
    }

    #[test]
    fn test_reply_parse_branches() {
        let ok: Reply<Probe> = Reply::parse("```json\n{\"category\": \"animal\"}\n```");
        assert_eq!(
            ok,
            Reply::Parsed(Probe {
                category: "animal".into()
            })
        );

        let bad: Reply<Probe> = Reply::parse("I think it's about animals.");
        assert!(bad.is_malformed());
        assert_eq!(bad.parsed(), None);
    }

    #[test]
    fn test_claude_error_mapping() {
        let quota: ServiceError = claude::Error::Api {
            status: 429,
            message: "too many".into(),
        }
        .into();
        assert_eq!(quota, ServiceError::Quota("too many".into()));

        let timeout: ServiceError = claude::Error::Api {
            status: 504,
            message: String::new(),
        }
        .into();
        assert_eq!(timeout, ServiceError::Timeout);

        let missing: ServiceError = claude::Error::NoApiKey.into();
        assert!(matches!(missing, ServiceError::NotConfigured(_)));
    }

    #[test]
    fn test_prompt_builder() {
        let prompt = Prompt::new(PromptRole::Judge, "score this")
            .with_system("You are an editor")
            .with_temperature(0.2)
            .with_max_tokens(600);
        assert_eq!(prompt.role.as_str(), "judge");
        assert_eq!(prompt.temperature, 0.2);
        assert_eq!(prompt.max_tokens, 600);
    }
}
