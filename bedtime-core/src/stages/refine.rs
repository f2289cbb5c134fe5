//! Stage 6: targeted revision driven by the judge's issues.

use super::{JudgeReport, Outcome, Story};
use crate::budget::MeteredService;
use crate::config::PipelineConfig;
use crate::service::{Prompt, PromptRole};
use tracing::warn;

const REFINE_PROMPT: &str = include_str!("prompts/refine.txt");

const REFINE_TEMPERATURE: f32 = 0.6;

/// Instruction used when a low score arrives without any issues.
const GENERIC_INSTRUCTION: &str = "The editor gave a low score but listed no specific issues. \
    Improve pacing and warmth: smooth any abrupt transitions, add a touch of sensory detail, \
    and make the ending feel calm and cozy.";

/// Render issues as numbered blocks for the refiner prompt.
pub(crate) fn format_issues(report: &JudgeReport) -> String {
    report
        .issues
        .iter()
        .enumerate()
        .map(|(i, issue)| {
            format!(
                "Issue {} [{}]:\n  Location: {}\n  Problem: {}\n  Fix: {}\n\n",
                i + 1,
                issue.severity.as_str().to_uppercase(),
                issue.location,
                issue.problem,
                issue.fix
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Refiner {
    max_tokens: usize,
}

impl Refiner {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_tokens: config.story_max_tokens,
        }
    }

    /// Revise `story` against the report's issues. Returns the story
    /// unchanged (flagged as a fallback) when the call fails or comes back
    /// empty.
    pub async fn refine(
        &self,
        story: &Story,
        report: &JudgeReport,
        service: &MeteredService,
    ) -> Outcome<Story> {
        let mut user = format!("ORIGINAL STORY:\n{}\n\n", story.text);

        if report.issues.is_empty() {
            user.push_str(&format!("INSTRUCTION:\n{GENERIC_INSTRUCTION}\n\n"));
        } else {
            user.push_str(&format!("ISSUES TO FIX:\n{}\n", format_issues(report)));
        }

        if !report.strengths.is_empty() {
            user.push_str("STRENGTHS TO PRESERVE:\n");
            for strength in &report.strengths {
                user.push_str(&format!("- {strength}\n"));
            }
        }

        let prompt = Prompt::new(PromptRole::Refiner, user)
            .with_system(REFINE_PROMPT)
            .with_temperature(REFINE_TEMPERATURE)
            .with_max_tokens(self.max_tokens);

        match service.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => Outcome::clean(Story::new(text.trim())),
            Ok(_) => {
                warn!("refiner returned nothing, keeping previous story");
                Outcome::fallback(story.clone())
            }
            Err(e) => {
                warn!(error = %e, "refiner failed, keeping previous story");
                Outcome::fallback(story.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceError;
    use crate::stages::{DimensionScores, Issue, Severity};
    use crate::testing::ScriptedService;
    use std::sync::Arc;

    fn low_report(issues: Vec<Issue>) -> JudgeReport {
        JudgeReport {
            issues,
            strengths: vec!["gentle tone".to_string()],
            ..JudgeReport::from_scores(DimensionScores::uniform(5.0))
        }
    }

    fn issue() -> Issue {
        Issue {
            location: "ending".into(),
            problem: "too abrupt".into(),
            fix: "add a goodnight scene".into(),
            severity: Severity::High,
        }
    }

    fn refiner() -> Refiner {
        Refiner::from_config(&PipelineConfig::default())
    }

    #[test]
    fn test_format_issues() {
        let text = format_issues(&low_report(vec![issue()]));
        assert!(text.starts_with("Issue 1 [HIGH]:"));
        assert!(text.contains("Location: ending"));
        assert!(text.contains("Fix: add a goodnight scene"));
    }

    #[test]
    fn test_format_issues_separates_blocks() {
        let text = format_issues(&low_report(vec![issue(), issue()]));
        assert!(text.contains("Fix: add a goodnight scene\n\nIssue 2 [HIGH]:"));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_refine_sends_issues_and_strengths() {
        let scripted = Arc::new(
            ScriptedService::new().with_reply(PromptRole::Refiner, "A revised story."),
        );
        let metered = MeteredService::new(scripted.clone(), 1);

        let outcome = refiner()
            .refine(&Story::new("Old story."), &low_report(vec![issue()]), &metered)
            .await;

        assert!(!outcome.fell_back);
        assert_eq!(outcome.value.text, "A revised story.");
        let call = &scripted.calls()[0];
        assert_eq!(call.temperature, 0.6);
        assert!(call.user.contains("Issue 1 [HIGH]"));
        assert!(call.user.contains("- gentle tone"));
        assert!(!call.user.contains("pacing and warmth"));
    }

    #[tokio::test]
    async fn test_no_issues_uses_generic_instruction() {
        let scripted = Arc::new(ScriptedService::new());
        let metered = MeteredService::new(scripted.clone(), 1);

        refiner()
            .refine(&Story::new("Old story."), &low_report(vec![]), &metered)
            .await;

        assert!(scripted.calls()[0].user.contains("Improve pacing and warmth"));
    }

    #[tokio::test]
    async fn test_failure_keeps_story() {
        let scripted = Arc::new(
            ScriptedService::new().with_failure(PromptRole::Refiner, ServiceError::Timeout),
        );
        let metered = MeteredService::new(scripted, 1);
        let original = Story::new("Old story.");

        let outcome = refiner()
            .refine(&original, &low_report(vec![issue()]), &metered)
            .await;

        assert!(outcome.fell_back);
        assert_eq!(outcome.value, original);
    }
}
