//! Pipeline configuration.
//!
//! Prompt wording lives next to each stage; this record holds the knobs
//! that change between deployments.

use thiserror::Error;

/// Score at or above which a story is accepted.
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 7.5;

/// Names reserved for each story.
pub const DEFAULT_NAMES_PER_STORY: usize = 3;

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("No API key configured - set ANTHROPIC_API_KEY environment variable")]
    NoApiKey,
}

/// Configuration for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Model for every stage (None uses the client default).
    pub model: Option<String>,

    /// Judge score needed to accept a story without refinement.
    pub accept_threshold: f64,

    /// How many character names to reserve per story.
    pub names_per_story: usize,

    /// Bound on the name registry (None keeps every name forever).
    pub registry_capacity: Option<usize>,

    /// Token limit for story generation and refinement.
    pub story_max_tokens: usize,

    /// Token limit for categorization, planning and judging.
    pub analysis_max_tokens: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: None,
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            names_per_story: DEFAULT_NAMES_PER_STORY,
            registry_capacity: None,
            story_max_tokens: 1024,
            analysis_max_tokens: 800,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `BEDTIME_*` environment variables.
    ///
    /// Unset variables keep their defaults; set-but-invalid ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(model) = lookup("BEDTIME_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = Some(model.trim().to_string());
        }

        if let Some(raw) = lookup("BEDTIME_ACCEPT_THRESHOLD") {
            let threshold: f64 = parse_var("BEDTIME_ACCEPT_THRESHOLD", &raw)?;
            if !(0.0..=10.0).contains(&threshold) {
                return Err(ConfigError::Invalid {
                    var: "BEDTIME_ACCEPT_THRESHOLD",
                    value: raw,
                    reason: "must be between 0 and 10".into(),
                });
            }
            config.accept_threshold = threshold;
        }

        if let Some(raw) = lookup("BEDTIME_NAMES_PER_STORY") {
            let count: usize = parse_var("BEDTIME_NAMES_PER_STORY", &raw)?;
            if count == 0 {
                return Err(ConfigError::Invalid {
                    var: "BEDTIME_NAMES_PER_STORY",
                    value: raw,
                    reason: "must be at least 1".into(),
                });
            }
            config.names_per_story = count;
        }

        if let Some(raw) = lookup("BEDTIME_REGISTRY_CAPACITY") {
            let capacity: usize = parse_var("BEDTIME_REGISTRY_CAPACITY", &raw)?;
            config.registry_capacity = (capacity > 0).then_some(capacity);
        }

        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_accept_threshold(mut self, threshold: f64) -> Self {
        self.accept_threshold = threshold.clamp(0.0, 10.0);
        self
    }

    pub fn with_names_per_story(mut self, count: usize) -> Self {
        self.names_per_story = count.max(1);
        self
    }

    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = (capacity > 0).then_some(capacity);
        self
    }
}

fn parse_var<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
