//! Stage 5: score a story and describe what to fix.
//!
//! The judge is fail-open. A reply that cannot be read is retried once at
//! temperature 0 with a stricter instruction, and if that also fails the
//! story gets a neutral report flagged as a fallback, which the controller
//! accepts as-is.

use super::{Categorization, Outcome, Story};
use crate::budget::MeteredService;
use crate::config::PipelineConfig;
use crate::service::{Prompt, PromptRole, Reply};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

const JUDGE_PROMPT: &str = include_str!("prompts/judge.txt");
const STRICT_SUFFIX: &str = include_str!("prompts/judge_strict.txt");

const JUDGE_TEMPERATURE: f32 = 0.2;
const STRICT_TEMPERATURE: f32 = 0.0;

/// Score given when the judge cannot be read.
pub const NEUTRAL_SCORE: f64 = 7.0;

/// How much an issue matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Lenient parse; critical/moderate/minor are accepted as aliases and
    /// anything unrecognised is treated as medium.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "major" => Severity::High,
            "low" | "minor" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Severity::parse(&raw))
    }
}

/// One structured critique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default, alias = "suggestion")]
    pub fix: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Medium
}

/// The five judged dimensions, each in `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub age_appropriateness: f64,
    pub engagement: f64,
    pub structure: f64,
    pub educational_value: f64,
    pub bedtime_suitability: f64,
}

impl DimensionScores {
    pub fn uniform(score: f64) -> Self {
        Self {
            age_appropriateness: score,
            engagement: score,
            structure: score,
            educational_value: score,
            bedtime_suitability: score,
        }
    }

    pub fn values(&self) -> [f64; 5] {
        [
            self.age_appropriateness,
            self.engagement,
            self.structure,
            self.educational_value,
            self.bedtime_suitability,
        ]
    }

    /// Clamp every dimension into `[0, 10]`; non-finite values become 0.
    pub fn clamped(self) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 10.0) } else { 0.0 };
        Self {
            age_appropriateness: clamp(self.age_appropriateness),
            engagement: clamp(self.engagement),
            structure: clamp(self.structure),
            educational_value: clamp(self.educational_value),
            bedtime_suitability: clamp(self.bedtime_suitability),
        }
    }

    pub fn mean(&self) -> f64 {
        self.values().iter().sum::<f64>() / 5.0
    }
}

/// Output of one judge evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub scores: DimensionScores,
    #[serde(rename = "overall_score")]
    pub overall: f64,
    /// The judge supplied its own weighted overall.
    #[serde(default)]
    pub weighted: bool,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub strengths: Vec<String>,
    /// The report is a placeholder because the judge could not be read.
    #[serde(default)]
    pub fallback: bool,
}

impl JudgeReport {
    /// Build a report from raw scores; overall is their mean.
    pub fn from_scores(scores: DimensionScores) -> Self {
        let scores = scores.clamped();
        Self {
            scores,
            overall: scores.mean(),
            weighted: false,
            issues: Vec::new(),
            strengths: Vec::new(),
            fallback: false,
        }
    }

    /// Placeholder used when the judge fails.
    pub fn neutral() -> Self {
        Self {
            fallback: true,
            ..Self::from_scores(DimensionScores::uniform(NEUTRAL_SCORE))
        }
    }

    /// Whether the story should ship without further refinement.
    pub fn accepts(&self, threshold: f64) -> bool {
        self.fallback || self.overall >= threshold
    }
}

#[derive(Debug, Deserialize)]
struct RawReport {
    scores: DimensionScores,
    #[serde(default)]
    overall_score: Option<f64>,
    #[serde(default)]
    weighted: bool,
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    strengths: Vec<String>,
}

impl RawReport {
    fn into_report(self) -> JudgeReport {
        let mut report = JudgeReport::from_scores(self.scores);
        if self.weighted {
            if let Some(overall) = self.overall_score.filter(|o| o.is_finite()) {
                report.overall = overall.clamp(0.0, 10.0);
                report.weighted = true;
            }
        }
        report.issues = self.issues;
        report.strengths = self
            .strengths
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        report
    }
}

/// Evaluates stories with one low-temperature call (plus at most one
/// format retry).
#[derive(Debug, Clone)]
pub struct QualityJudge {
    max_tokens: usize,
}

impl QualityJudge {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_tokens: config.analysis_max_tokens,
        }
    }

    /// The format retry only runs when `reserved` calls stay available
    /// after it.
    pub async fn evaluate(
        &self,
        story: &Story,
        categorization: &Categorization,
        service: &MeteredService,
        reserved: usize,
    ) -> Outcome<JudgeReport> {
        let user = format!(
            "Category: {}\nThemes: {}\nWord count: {}\n\nStory:\n{}",
            categorization.category,
            categorization.themes_text(),
            story.word_count,
            story.text
        );
        let prompt = Prompt::new(PromptRole::Judge, user)
            .with_system(JUDGE_PROMPT)
            .with_temperature(JUDGE_TEMPERATURE)
            .with_max_tokens(self.max_tokens);

        match service.complete_json::<RawReport>(&prompt).await {
            Ok(Reply::Parsed(raw)) => return Outcome::clean(raw.into_report()),
            Ok(Reply::Malformed(_)) => {}
            Err(e) => {
                warn!(error = %e, "judge failed, accepting with neutral score");
                return Outcome::fallback(JudgeReport::neutral());
            }
        }

        if !service.budget().can_afford(1, reserved) {
            warn!("judge reply malformed and no budget to retry");
            return Outcome::fallback(JudgeReport::neutral());
        }

        warn!("judge reply malformed, retrying with strict format");
        let strict = Prompt {
            system: Some(format!("{JUDGE_PROMPT}{STRICT_SUFFIX}")),
            temperature: STRICT_TEMPERATURE,
            ..prompt
        };
        match service.complete_json::<RawReport>(&strict).await {
            Ok(Reply::Parsed(raw)) => Outcome::clean(raw.into_report()),
            _ => {
                warn!("judge retry failed, accepting with neutral score");
                Outcome::fallback(JudgeReport::neutral())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceError;
    use crate::testing::{self, ScriptedService};
    use std::sync::Arc;

    fn judge() -> QualityJudge {
        QualityJudge::from_config(&PipelineConfig::default())
    }

    fn story() -> Story {
        Story::new("Once upon a time there was a rabbit.")
    }

    #[test]
    fn test_severity_aliases() {
        assert_eq!(Severity::parse("critical"), Severity::High);
        assert_eq!(Severity::parse("Moderate"), Severity::Medium);
        assert_eq!(Severity::parse("minor"), Severity::Low);
        assert_eq!(Severity::parse("whatever"), Severity::Medium);
    }

    #[test]
    fn test_overall_is_mean_unless_weighted() {
        let raw: RawReport = serde_json::from_str(
            r#"{"scores": {"age_appropriateness": 10, "engagement": 8, "structure": 6,
                "educational_value": 4, "bedtime_suitability": 2}, "overall_score": 9.5}"#,
        )
        .unwrap();
        let report = raw.into_report();
        assert_eq!(report.overall, 6.0);
        assert!(!report.weighted);

        let raw: RawReport = serde_json::from_str(
            r#"{"scores": {"age_appropriateness": 10, "engagement": 8, "structure": 6,
                "educational_value": 4, "bedtime_suitability": 2},
                "overall_score": 9.5, "weighted": true}"#,
        )
        .unwrap();
        let report = raw.into_report();
        assert_eq!(report.overall, 9.5);
        assert!(report.weighted);
    }

    #[test]
    fn test_scores_are_clamped() {
        let report = JudgeReport::from_scores(DimensionScores {
            age_appropriateness: 14.0,
            engagement: -3.0,
            structure: 5.0,
            educational_value: 5.0,
            bedtime_suitability: f64::NAN,
        });
        assert_eq!(report.scores.age_appropriateness, 10.0);
        assert_eq!(report.scores.engagement, 0.0);
        assert_eq!(report.scores.bedtime_suitability, 0.0);
        assert_eq!(report.overall, 4.0);
    }

    #[test]
    fn test_neutral_report_accepts() {
        let report = JudgeReport::neutral();
        assert_eq!(report.overall, 7.0);
        assert!(report.fallback);
        assert!(report.accepts(7.5));
        assert!(!JudgeReport::from_scores(DimensionScores::uniform(7.0)).accepts(7.5));
    }

    #[test]
    fn test_report_serializes_overall_score() {
        let json = serde_json::to_value(JudgeReport::from_scores(DimensionScores::uniform(8.0)))
            .unwrap();
        assert_eq!(json["overall_score"], 8.0);
        assert_eq!(json["scores"]["bedtime_suitability"], 8.0);
    }

    #[tokio::test]
    async fn test_evaluate_parses_issues() {
        let reply = r#"{
            "scores": {"age_appropriateness": 8, "engagement": 6, "structure": 7,
                       "educational_value": 7, "bedtime_suitability": 7},
            "strengths": ["warm ending"],
            "issues": [{"location": "opening", "problem": "slow start",
                        "fix": "open with dialogue", "severity": "critical"}]
        }"#;
        let scripted = Arc::new(ScriptedService::new().with_reply(PromptRole::Judge, reply));
        let metered = MeteredService::new(scripted.clone(), 2);

        let outcome = judge()
            .evaluate(&story(), &Categorization::fallback(), &metered, 0)
            .await;

        assert!(!outcome.fell_back);
        let report = outcome.value;
        assert_eq!(report.overall, 7.0);
        assert_eq!(report.strengths, vec!["warm ending"]);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Severity::High);
        assert_eq!(scripted.call_count(), 1);
        assert_eq!(scripted.calls()[0].temperature, 0.2);
    }

    #[tokio::test]
    async fn test_malformed_reply_retried_strictly() {
        let scripted = Arc::new(
            ScriptedService::new()
                .with_reply(PromptRole::Judge, "Lovely story, 8/10!")
                .with_reply(PromptRole::Judge, testing::judge_reply(9.0)),
        );
        let metered = MeteredService::new(scripted.clone(), 2);

        let outcome = judge()
            .evaluate(&story(), &Categorization::fallback(), &metered, 0)
            .await;

        assert!(!outcome.fell_back);
        assert_eq!(outcome.value.overall, 9.0);
        let calls = scripted.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].temperature, 0.0);
        assert!(calls[1].system.as_deref().unwrap().contains("could not be read"));
    }

    #[tokio::test]
    async fn test_two_malformed_replies_fail_open() {
        let scripted = Arc::new(
            ScriptedService::new()
                .with_reply(PromptRole::Judge, "nope")
                .with_reply(PromptRole::Judge, "still nope"),
        );
        let metered = MeteredService::new(scripted, 2);

        let outcome = judge()
            .evaluate(&story(), &Categorization::fallback(), &metered, 0)
            .await;

        assert!(outcome.fell_back);
        assert_eq!(outcome.value, JudgeReport::neutral());
    }

    #[tokio::test]
    async fn test_no_retry_without_budget() {
        let scripted = Arc::new(ScriptedService::new().with_reply(PromptRole::Judge, "nope"));
        let metered = MeteredService::new(scripted.clone(), 1);

        let outcome = judge()
            .evaluate(&story(), &Categorization::fallback(), &metered, 0)
            .await;

        assert!(outcome.fell_back);
        assert_eq!(scripted.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_keeps_reserved_calls() {
        let scripted = Arc::new(
            ScriptedService::new()
                .with_reply(PromptRole::Judge, "nope")
                .with_reply(PromptRole::Judge, testing::judge_reply(9.0)),
        );
        let metered = MeteredService::new(scripted.clone(), 3);

        let outcome = judge()
            .evaluate(&story(), &Categorization::fallback(), &metered, 2)
            .await;

        assert!(outcome.fell_back);
        assert_eq!(scripted.call_count(), 1);
        assert_eq!(metered.budget().remaining(), 2);
    }

    #[tokio::test]
    async fn test_service_error_is_not_retried() {
        let scripted = Arc::new(
            ScriptedService::new().with_failure(PromptRole::Judge, ServiceError::Timeout),
        );
        let metered = MeteredService::new(scripted.clone(), 3);

        let outcome = judge()
            .evaluate(&story(), &Categorization::fallback(), &metered, 0)
            .await;

        assert!(outcome.fell_back);
        assert_eq!(scripted.call_count(), 1);
    }
}
