//! Stage 1: classify a raw request into category, themes and tone.

use super::Outcome;
use crate::budget::MeteredService;
use crate::config::PipelineConfig;
use crate::service::{Prompt, PromptRole, Reply, ServiceError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const CATEGORIZE_PROMPT: &str = include_str!("prompts/categorize.txt");

const CATEGORIZE_TEMPERATURE: f32 = 0.3;

const MAX_THEMES: usize = 4;

/// The fixed set of story categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Adventure,
    Friendship,
    Fantasy,
    Bedtime,
    Learning,
    Family,
    Animal,
    Magic,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Adventure,
        Category::Friendship,
        Category::Fantasy,
        Category::Bedtime,
        Category::Learning,
        Category::Family,
        Category::Animal,
        Category::Magic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Adventure => "adventure",
            Category::Friendship => "friendship",
            Category::Fantasy => "fantasy",
            Category::Bedtime => "bedtime",
            Category::Learning => "learning",
            Category::Family => "family",
            Category::Animal => "animal",
            Category::Magic => "magic",
        }
    }

    /// Case-insensitive lookup. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the categorizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub category: Category,
    pub themes: Vec<String>,
    pub tone: String,
}

impl Categorization {
    /// The default used whenever the model's answer is unusable.
    pub fn fallback() -> Self {
        Self {
            category: Category::Bedtime,
            themes: vec!["imagination".to_string()],
            tone: "gentle".to_string(),
        }
    }

    /// Themes joined for prompt text.
    pub fn themes_text(&self) -> String {
        self.themes.join(", ")
    }
}

#[derive(Debug, Deserialize)]
struct RawCategorization {
    #[serde(default)]
    category: String,
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    tone: String,
}

impl RawCategorization {
    fn normalize(self) -> Option<Categorization> {
        let category = Category::parse(&self.category)?;

        let mut themes: Vec<String> = self
            .themes
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .take(MAX_THEMES)
            .collect();
        if themes.is_empty() {
            themes.push("imagination".to_string());
        }

        let tone = match self.tone.trim() {
            "" => "gentle".to_string(),
            tone => tone.to_lowercase(),
        };

        Some(Categorization {
            category,
            themes,
            tone,
        })
    }
}

/// Classifies requests with one low-temperature call.
#[derive(Debug, Clone)]
pub struct Categorizer {
    max_tokens: usize,
}

impl Categorizer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_tokens: config.analysis_max_tokens,
        }
    }

    /// Categorize a request.
    ///
    /// Exactly one call. Malformed output or an unknown category falls back
    /// to [`Categorization::fallback`]; a service failure is returned to the
    /// caller because no other stage has run yet.
    pub async fn categorize(
        &self,
        request: &str,
        service: &MeteredService,
    ) -> Result<Outcome<Categorization>, ServiceError> {
        let prompt = Prompt::new(
            PromptRole::Categorizer,
            format!("Story request: \"{request}\""),
        )
        .with_system(CATEGORIZE_PROMPT)
        .with_temperature(CATEGORIZE_TEMPERATURE)
        .with_max_tokens(self.max_tokens);

        let reply: Reply<RawCategorization> = service.complete_json(&prompt).await?;

        match reply.parsed().and_then(RawCategorization::normalize) {
            Some(categorization) => Ok(Outcome::clean(categorization)),
            None => {
                warn!("categorizer reply unusable, using default categorization");
                Ok(Outcome::fallback(Categorization::fallback()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedService;
    use std::sync::Arc;

    fn categorizer() -> Categorizer {
        Categorizer::from_config(&PipelineConfig::default())
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse("Animal"), Some(Category::Animal));
        assert_eq!(Category::parse(" magic "), Some(Category::Magic));
        assert_eq!(Category::parse("horror"), None);
        assert_eq!(Category::ALL.len(), 8);
    }

    #[tokio::test]
    async fn test_categorize_parses_reply() {
        let scripted = Arc::new(ScriptedService::new().with_reply(
            PromptRole::Categorizer,
            r#"```json
{"category": "animal", "themes": ["courage", " kindness ", ""], "tone": "Playful"}
```"#,
        ));
        let metered = MeteredService::new(scripted.clone(), 2);

        let outcome = categorizer()
            .categorize("a story about a brave rabbit", &metered)
            .await
            .unwrap();

        assert!(!outcome.fell_back);
        assert_eq!(outcome.value.category, Category::Animal);
        assert_eq!(outcome.value.themes, vec!["courage", "kindness"]);
        assert_eq!(outcome.value.tone, "playful");

        let calls = scripted.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, 0.3);
        assert!(calls[0].user.contains("brave rabbit"));
    }

    #[tokio::test]
    async fn test_unknown_category_falls_back() {
        let scripted = Arc::new(ScriptedService::new().with_reply(
            PromptRole::Categorizer,
            r#"{"category": "horror", "themes": ["fear"], "tone": "dark"}"#,
        ));
        let metered = MeteredService::new(scripted, 2);

        let outcome = categorizer().categorize("spooky", &metered).await.unwrap();
        assert!(outcome.fell_back);
        assert_eq!(outcome.value, Categorization::fallback());
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back_after_one_call() {
        let scripted = Arc::new(
            ScriptedService::new().with_reply(PromptRole::Categorizer, "It's about a rabbit!"),
        );
        let metered = MeteredService::new(scripted.clone(), 2);

        let outcome = categorizer().categorize("rabbit", &metered).await.unwrap();
        assert!(outcome.fell_back);
        assert_eq!(outcome.value.category, Category::Bedtime);
        assert_eq!(outcome.value.themes, vec!["imagination"]);
        assert_eq!(outcome.value.tone, "gentle");
        assert_eq!(scripted.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_themes_and_tone_get_defaults() {
        let scripted = Arc::new(
            ScriptedService::new().with_reply(PromptRole::Categorizer, r#"{"category": "family"}"#),
        );
        let metered = MeteredService::new(scripted, 2);

        let outcome = categorizer().categorize("grandma", &metered).await.unwrap();
        assert!(!outcome.fell_back);
        assert_eq!(outcome.value.themes, vec!["imagination"]);
        assert_eq!(outcome.value.tone, "gentle");
    }

    #[tokio::test]
    async fn test_service_failure_is_returned() {
        let metered = MeteredService::new(Arc::new(ScriptedService::unreachable()), 2);
        assert!(categorizer().categorize("rabbit", &metered).await.is_err());
    }
}
