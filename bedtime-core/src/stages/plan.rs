//! Stage 3: multi-plan generation and selection.
//!
//! The generator always yields three plans, one per [`Approach`], even when
//! the model returns fewer. The judge scores them and the highest total wins,
//! with ties going to the earlier approach.

use super::{Categorization, Outcome};
use crate::budget::MeteredService;
use crate::config::PipelineConfig;
use crate::service::{Prompt, PromptRole, Reply};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const PLANS_PROMPT: &str = include_str!("prompts/plans.txt");
const PLAN_JUDGE_PROMPT: &str = include_str!("prompts/plan_judge.txt");

const PLANS_TEMPERATURE: f32 = 0.7;
const PLAN_JUDGE_TEMPERATURE: f32 = 0.2;

/// Narrative approach of a candidate plan, in generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Approach {
    Emotional,
    Action,
    Discovery,
}

impl Approach {
    pub const ALL: [Approach; 3] = [Approach::Emotional, Approach::Action, Approach::Discovery];

    pub fn as_str(self) -> &'static str {
        match self {
            Approach::Emotional => "emotional",
            Approach::Action => "action",
            Approach::Discovery => "discovery",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(value))
    }

    fn focus(self) -> &'static str {
        match self {
            Approach::Emotional => "the characters' feelings, friendships and personal growth",
            Approach::Action => "a gentle adventure with a challenge to overcome",
            Approach::Discovery => "curiosity, exploration and solving a puzzle",
        }
    }

    fn index(self) -> usize {
        match self {
            Approach::Emotional => 0,
            Approach::Action => 1,
            Approach::Discovery => 2,
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate narrative approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPlan {
    /// `None` for the implicit plan used when multi-plan is off.
    pub approach: Option<Approach>,
    pub plan_text: String,
    /// Set when this plan was copied from another approach to fill a gap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framing_note: Option<String>,
}

impl StoryPlan {
    /// The single plan derived straight from the categorization.
    pub fn implicit(request: &str, categorization: &Categorization) -> Self {
        Self {
            approach: None,
            plan_text: format!(
                "A {tone} {category} story for: {request}. Weave in {themes}, build to a gentle \
                 problem the characters solve together, and end somewhere warm and sleepy.",
                tone = categorization.tone,
                category = categorization.category,
                themes = categorization.themes_text(),
            ),
            framing_note: None,
        }
    }

    fn synthesized(approach: Approach, request: &str, categorization: &Categorization) -> Self {
        Self {
            approach: Some(approach),
            plan_text: format!(
                "SETUP: characters from \"{request}\" in a {tone} {category} setting. \
                 CONFLICT: a small problem touching on {themes}. \
                 JOURNEY: the story follows {focus}. \
                 RESOLUTION: everything settles into a calm, cozy ending.",
                tone = categorization.tone,
                category = categorization.category,
                themes = categorization.themes_text(),
                focus = approach.focus(),
            ),
            framing_note: None,
        }
    }

    /// Label for result metadata: the approach, or "single-plan".
    pub fn label(&self) -> &'static str {
        self.approach.map_or("single-plan", Approach::as_str)
    }

    /// Plan text plus any framing note, as handed to the storyteller.
    pub fn prompt_text(&self) -> String {
        match &self.framing_note {
            Some(note) => format!("{}\n({note})", self.plan_text),
            None => self.plan_text.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlans {
    List(Vec<RawPlan>),
    Wrapped { plans: Vec<RawPlan> },
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    approach: String,
    #[serde(default, alias = "plan", alias = "summary")]
    plan_text: String,
}

/// Place parsed plans into their approach slots and fill any gap from the
/// nearest filled slot (earlier slot first on equal distance).
fn assemble_plans(raw: Vec<RawPlan>) -> (Vec<Option<StoryPlan>>, bool) {
    let mut slots: [Option<String>; 3] = [None, None, None];
    let mut untagged = Vec::new();

    for plan in raw {
        let text = plan.plan_text.trim().to_string();
        if text.is_empty() {
            continue;
        }
        match Approach::parse(&plan.approach) {
            Some(approach) if slots[approach.index()].is_none() => {
                slots[approach.index()] = Some(text);
            }
            _ => untagged.push(text),
        }
    }

    let mut untagged = untagged.into_iter();
    for slot in slots.iter_mut().filter(|s| s.is_none()) {
        match untagged.next() {
            Some(text) => *slot = Some(text),
            None => break,
        }
    }

    let filled: Vec<usize> = (0..3).filter(|&i| slots[i].is_some()).collect();
    let mut duplicated = false;
    let plans = Approach::ALL
        .into_iter()
        .map(|approach| {
            let i = approach.index();
            if let Some(text) = &slots[i] {
                return Some(StoryPlan {
                    approach: Some(approach),
                    plan_text: text.clone(),
                    framing_note: None,
                });
            }
            let source = filled.iter().copied().min_by_key(|&j| (i.abs_diff(j), j))?;
            duplicated = true;
            Some(StoryPlan {
                approach: Some(approach),
                plan_text: slots[source].clone().unwrap_or_default(),
                framing_note: Some(format!(
                    "Reframed from the {} plan: shift the focus to {}",
                    Approach::ALL[source],
                    approach.focus()
                )),
            })
        })
        .collect();

    (plans, duplicated)
}

/// Produces the three candidate plans.
#[derive(Debug, Clone)]
pub struct PlanGenerator {
    max_tokens: usize,
}

impl PlanGenerator {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_tokens: config.analysis_max_tokens,
        }
    }

    /// Generate exactly three plans in approach order. Never fails.
    pub async fn generate(
        &self,
        request: &str,
        categorization: &Categorization,
        service: &MeteredService,
    ) -> Outcome<Vec<StoryPlan>> {
        let prompt = Prompt::new(
            PromptRole::Planner,
            format!(
                "Story request: \"{request}\"\nCategory: {}\nThemes: {}\nTone: {}",
                categorization.category,
                categorization.themes_text(),
                categorization.tone
            ),
        )
        .with_system(PLANS_PROMPT)
        .with_temperature(PLANS_TEMPERATURE)
        .with_max_tokens(self.max_tokens);

        let raw = match service.complete_json::<RawPlans>(&prompt).await {
            Ok(Reply::Parsed(RawPlans::List(plans) | RawPlans::Wrapped { plans })) => plans,
            Ok(Reply::Malformed(_)) => {
                warn!("plan reply malformed, synthesizing plans");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "plan generation failed, synthesizing plans");
                Vec::new()
            }
        };

        let (slots, duplicated) = assemble_plans(raw);
        if slots.iter().all(Option::is_some) {
            let plans = slots.into_iter().flatten().collect();
            return if duplicated {
                Outcome::fallback(plans)
            } else {
                Outcome::clean(plans)
            };
        }

        Outcome::fallback(
            Approach::ALL
                .into_iter()
                .map(|a| StoryPlan::synthesized(a, request, categorization))
                .collect(),
        )
    }
}

/// Criterion scores for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanScores {
    #[serde(default)]
    pub originality: f64,
    #[serde(default)]
    pub narrative_potential: f64,
    #[serde(default)]
    pub alignment: f64,
    #[serde(default)]
    pub child_appeal: f64,
}

impl PlanScores {
    fn clamped(self) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 10.0) } else { 0.0 };
        Self {
            originality: clamp(self.originality),
            narrative_potential: clamp(self.narrative_potential),
            alignment: clamp(self.alignment),
            child_appeal: clamp(self.child_appeal),
        }
    }

    pub fn total(&self) -> f64 {
        self.originality + self.narrative_potential + self.alignment + self.child_appeal
    }
}

/// The plan judge's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSelection {
    /// Index into the plan list, always in `0..3`.
    pub chosen: usize,
    pub scores: Vec<PlanScores>,
    pub reasoning: String,
}

impl PlanSelection {
    /// Select the highest total; ties keep the earlier plan.
    pub fn from_scores(scores: Vec<PlanScores>, reasoning: String) -> Self {
        let mut chosen = 0;
        for (i, s) in scores.iter().enumerate().take(Approach::ALL.len()) {
            if s.total() > scores[chosen].total() {
                chosen = i;
            }
        }
        Self {
            chosen,
            scores,
            reasoning,
        }
    }

    fn first_plan(reasoning: &str) -> Self {
        Self {
            chosen: 0,
            scores: vec![PlanScores::default(); Approach::ALL.len()],
            reasoning: reasoning.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlanVerdict {
    #[serde(default)]
    plans: Vec<RawPlanEntry>,
    #[serde(default)]
    best_plan_index: Option<usize>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawPlanEntry {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    scores: PlanScores,
}

/// Scores the candidate plans with one low-temperature call.
#[derive(Debug, Clone)]
pub struct PlanJudge {
    max_tokens: usize,
}

impl PlanJudge {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_tokens: config.analysis_max_tokens,
        }
    }

    /// Pick a plan. Any failure selects plan 0.
    pub async fn select(
        &self,
        request: &str,
        plans: &[StoryPlan],
        service: &MeteredService,
    ) -> Outcome<PlanSelection> {
        let listing: String = plans
            .iter()
            .enumerate()
            .map(|(i, p)| format!("PLAN {i} ({}):\n{}\n\n", p.label(), p.prompt_text()))
            .collect();
        let prompt = Prompt::new(
            PromptRole::PlanJudge,
            format!("Original request: \"{request}\"\n\n{listing}"),
        )
        .with_system(PLAN_JUDGE_PROMPT)
        .with_temperature(PLAN_JUDGE_TEMPERATURE)
        .with_max_tokens(self.max_tokens);

        let verdict = match service.complete_json::<RawPlanVerdict>(&prompt).await {
            Ok(Reply::Parsed(verdict)) if !verdict.plans.is_empty() => verdict,
            Ok(_) => {
                warn!("plan judge reply unusable, defaulting to first plan");
                return Outcome::fallback(PlanSelection::first_plan(
                    "plan judge reply unreadable; using the first plan",
                ));
            }
            Err(e) => {
                warn!(error = %e, "plan judge failed, defaulting to first plan");
                return Outcome::fallback(PlanSelection::first_plan(
                    "plan judge unavailable; using the first plan",
                ));
            }
        };

        let mut scores = vec![PlanScores::default(); plans.len().max(1)];
        for (position, entry) in verdict.plans.into_iter().enumerate() {
            let slot = entry.index.unwrap_or(position);
            if let Some(score) = scores.get_mut(slot) {
                *score = entry.scores.clamped();
            }
        }

        let selection = PlanSelection::from_scores(scores, verdict.reasoning);
        if let Some(reported) = verdict.best_plan_index {
            if reported != selection.chosen {
                debug!(
                    reported,
                    chosen = selection.chosen,
                    "plan judge index disagrees with its scores"
                );
            }
        }
        Outcome::clean(selection)
    }
}
