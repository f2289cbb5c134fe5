//! Stage 4: render the full story.

use super::{Categorization, StoryPlan};
use crate::budget::MeteredService;
use crate::config::PipelineConfig;
use crate::service::{Prompt, PromptRole, ServiceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const STORY_PROMPT: &str = include_str!("prompts/story.txt");
const FIRST_TRY_PROMPT: &str = include_str!("prompts/story_first_try.txt");

const STORY_TEMPERATURE: f32 = 0.8;
const FIRST_TRY_TEMPERATURE: f32 = 0.7;

/// A generated or refined story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub text: String,
    pub word_count: usize,
}

impl Story {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let word_count = text.split_whitespace().count();
        Self { text, word_count }
    }

    /// Minimal story used when generation fails outright.
    pub fn templated(request: &str, hero: &str) -> Self {
        Self::new(format!(
            "Once upon a time, there was a kind friend named {hero}. \
             Tonight's story is about {request}. \
             {hero} spent the day exploring, laughing and helping others, \
             and when the stars came out, {hero} curled up somewhere cozy and warm. \
             With a happy heart and a sleepy yawn, {hero} drifted off to dreamland. \
             The end."
        ))
    }
}

/// Why the storyteller produced nothing usable.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Storyteller returned an empty reply")]
    Empty,
}

/// Writes the story with one high-temperature call.
#[derive(Debug, Clone)]
pub struct StoryGenerator {
    max_tokens: usize,
}

impl StoryGenerator {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_tokens: config.story_max_tokens,
        }
    }

    /// Generate a story.
    ///
    /// When `unjudged` is set the story will ship without review, so the
    /// prompt asks for a polished first draft at a slightly lower temperature.
    pub async fn generate(
        &self,
        request: &str,
        categorization: &Categorization,
        plan: &StoryPlan,
        names: &[String],
        unjudged: bool,
        service: &MeteredService,
    ) -> Result<Story, StoryError> {
        let (system, temperature) = if unjudged {
            (format!("{STORY_PROMPT}{FIRST_TRY_PROMPT}"), FIRST_TRY_TEMPERATURE)
        } else {
            (STORY_PROMPT.to_string(), STORY_TEMPERATURE)
        };

        let user = format!(
            "Story request: \"{request}\"\n\
             Category: {category}\n\
             Themes: {themes}\n\
             Tone: {tone}\n\
             Character names: {names}\n\n\
             Story plan:\n{plan}",
            category = categorization.category,
            themes = categorization.themes_text(),
            tone = categorization.tone,
            names = names.join(", "),
            plan = plan.prompt_text(),
        );

        let prompt = Prompt::new(PromptRole::Storyteller, user)
            .with_system(system)
            .with_temperature(temperature)
            .with_max_tokens(self.max_tokens);

        let text = service.complete(&prompt).await?;
        if text.trim().is_empty() {
            return Err(StoryError::Empty);
        }
        Ok(Story::new(text.trim()))
    }
}
