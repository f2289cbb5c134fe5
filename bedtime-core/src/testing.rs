//! Testing utilities for the story pipeline.
//!
//! This module provides tools for deterministic tests without API calls:
//! - `ScriptedService`, a [`GenerationService`] that answers from per-role
//!   scripts and records every prompt it receives
//! - Reply builders producing well-formed JSON for each structured stage

use crate::service::{GenerationService, Prompt, PromptRole, ServiceError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Story text returned by the default storyteller script.
pub const DEFAULT_STORY: &str = "Once upon a time, in a meadow full of clover, a little rabbit \
named Amara wondered what lay beyond the tall grass. With her friend Kenji the hedgehog, she \
followed a trail of glowing fireflies to the old oak tree, where Leilani the owl told them \
stories of the moon. When the fireflies dimmed, the friends walked home together, proud of \
their brave little adventure, and Amara fell asleep smiling beneath the stars. The end.";

/// Story text returned by the default refiner script.
pub const REFINED_STORY: &str = "Once upon a time, in a quiet meadow, a gentle rabbit named \
Amara found the courage to explore. Her friends Kenji and Leilani walked beside her under the \
soft light of the fireflies, and together they learned that being brave means helping each \
other. Back home, snuggled in her burrow, Amara whispered goodnight to the moon. The end.";

/// Default names reply; every run proposes the same three names.
pub const DEFAULT_NAMES: &str = "Amara\nKenji\nLeilani";

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Failure(ServiceError),
}

/// A generation service that returns scripted replies.
///
/// Each role has a queue of answers consumed in order; once a queue is empty
/// the role's default answer is returned.
pub struct ScriptedService {
    queues: Mutex<HashMap<PromptRole, VecDeque<Scripted>>>,
    defaults: HashMap<PromptRole, Scripted>,
    calls: Mutex<Vec<Prompt>>,
    fail_all: Option<ServiceError>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedService {
    /// A service whose every role has a well-formed default reply.
    pub fn new() -> Self {
        let defaults = HashMap::from([
            (
                PromptRole::Categorizer,
                Scripted::Reply(categorization_reply("animal", &["courage", "friendship"], "gentle")),
            ),
            (PromptRole::Names, Scripted::Reply(DEFAULT_NAMES.to_string())),
            (PromptRole::Planner, Scripted::Reply(plans_reply())),
            (PromptRole::PlanJudge, Scripted::Reply(plan_judge_reply([7.0, 8.5, 6.0]))),
            (PromptRole::Storyteller, Scripted::Reply(DEFAULT_STORY.to_string())),
            (PromptRole::Judge, Scripted::Reply(judge_reply(8.5))),
            (PromptRole::Refiner, Scripted::Reply(REFINED_STORY.to_string())),
        ]);

        Self {
            queues: Mutex::new(HashMap::new()),
            defaults,
            calls: Mutex::new(Vec::new()),
            fail_all: None,
        }
    }

    /// A service that fails every call, as if the network were down.
    pub fn unreachable() -> Self {
        Self {
            fail_all: Some(ServiceError::Network("connection refused".to_string())),
            ..Self::new()
        }
    }

    fn push(mut self, role: PromptRole, answer: Scripted) -> Self {
        self.queues
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(role)
            .or_default()
            .push_back(answer);
        self
    }

    /// Queue a reply for the next unanswered call from `role`.
    pub fn with_reply(self, role: PromptRole, reply: impl Into<String>) -> Self {
        self.push(role, Scripted::Reply(reply.into()))
    }

    /// Queue a failure for the next unanswered call from `role`.
    pub fn with_failure(self, role: PromptRole, error: ServiceError) -> Self {
        self.push(role, Scripted::Failure(error))
    }

    /// Replace the answer given once `role`'s queue is empty.
    pub fn with_default(mut self, role: PromptRole, answer: Scripted) -> Self {
        self.defaults.insert(role, answer);
        self
    }

    /// Every prompt received, in order.
    pub fn calls(&self) -> Vec<Prompt> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Prompts received from one role.
    pub fn calls_for(&self, role: PromptRole) -> Vec<Prompt> {
        self.calls()
            .into_iter()
            .filter(|p| p.role == role)
            .collect()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ServiceError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());

        if let Some(ref error) = self.fail_all {
            return Err(error.clone());
        }

        let queued = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&prompt.role)
            .and_then(VecDeque::pop_front);

        match queued.or_else(|| self.defaults.get(&prompt.role).cloned()) {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Failure(error)) => Err(error),
            None => Err(ServiceError::NotConfigured(format!(
                "no script for role {}",
                prompt.role
            ))),
        }
    }
}

/// A categorizer reply.
pub fn categorization_reply(category: &str, themes: &[&str], tone: &str) -> String {
    serde_json::json!({
        "category": category,
        "themes": themes,
        "tone": tone,
    })
    .to_string()
}

/// A planner reply with all three approaches.
pub fn plans_reply() -> String {
    serde_json::json!([
        {
            "approach": "emotional",
            "plan_text": "SETUP: a shy rabbit in a meadow. CONFLICT: she is afraid of the dark. \
                          JOURNEY: friends show her the fireflies. RESOLUTION: she sleeps peacefully."
        },
        {
            "approach": "action",
            "plan_text": "SETUP: a rabbit and a hedgehog. CONFLICT: a lost acorn. \
                          JOURNEY: a gentle chase across the stream. RESOLUTION: the acorn is found."
        },
        {
            "approach": "discovery",
            "plan_text": "SETUP: a curious rabbit. CONFLICT: strange lights at night. \
                          JOURNEY: she learns about fireflies. RESOLUTION: she shares what she learned."
        }
    ])
    .to_string()
}

/// A plan judge reply giving each plan the same score on every criterion.
pub fn plan_judge_reply(per_plan: [f64; 3]) -> String {
    let plans: Vec<_> = per_plan
        .iter()
        .enumerate()
        .map(|(index, &s)| {
            serde_json::json!({
                "index": index,
                "scores": {
                    "originality": s,
                    "narrative_potential": s,
                    "alignment": s,
                    "child_appeal": s,
                },
                "strengths": ["clear arc"],
                "weaknesses": [],
            })
        })
        .collect();

    serde_json::json!({
        "plans": plans,
        "best_plan_index": 0,
        "reasoning": "the strongest combination of warmth and originality",
    })
    .to_string()
}

/// A judge reply scoring every dimension `score`, with one issue when the
/// score is below 7.5.
pub fn judge_reply(score: f64) -> String {
    let issues = if score < 7.5 {
        serde_json::json!([{
            "location": "ending",
            "problem": "the ending is abrupt",
            "fix": "add a short goodnight scene",
            "severity": "medium",
        }])
    } else {
        serde_json::json!([])
    };
    judge_reply_with_issues(score, issues)
}

/// A judge reply with a low score but no issues, the inconsistency the
/// refiner handles with a generic instruction.
pub fn judge_reply_without_issues(score: f64) -> String {
    judge_reply_with_issues(score, serde_json::json!([]))
}

fn judge_reply_with_issues(score: f64, issues: serde_json::Value) -> String {
    serde_json::json!({
        "scores": {
            "age_appropriateness": score,
            "engagement": score,
            "structure": score,
            "educational_value": score,
            "bedtime_suitability": score,
        },
        "strengths": ["warm characters"],
        "issues": issues,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_default() {
        let service = ScriptedService::new()
            .with_reply(PromptRole::Storyteller, "first")
            .with_failure(PromptRole::Storyteller, ServiceError::Timeout);
        let prompt = Prompt::new(PromptRole::Storyteller, "go");

        assert_eq!(service.complete(&prompt).await.unwrap(), "first");
        assert_eq!(service.complete(&prompt).await, Err(ServiceError::Timeout));
        assert_eq!(service.complete(&prompt).await.unwrap(), DEFAULT_STORY);
        assert_eq!(service.call_count(), 3);
        assert_eq!(service.calls_for(PromptRole::Judge).len(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_fails_everything() {
        let service = ScriptedService::unreachable();
        let prompt = Prompt::new(PromptRole::Categorizer, "go");
        assert!(matches!(
            service.complete(&prompt).await,
            Err(ServiceError::Network(_))
        ));
        assert_eq!(service.call_count(), 1);
    }
}
