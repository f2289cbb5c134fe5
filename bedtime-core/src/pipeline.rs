//! The pipeline controller.
//!
//! One state machine serves every mode. [`ModeConfig`] decides whether the
//! plan stage runs and how many refinement rounds are allowed; the run's
//! [`CallBudget`](crate::budget::CallBudget) decides whether optional calls
//! fit. Only a failure of the very first call aborts a run; everything after
//! it degrades and is recorded in [`RunMetadata`].

use crate::budget::MeteredService;
use crate::config::{ConfigError, PipelineConfig};
use crate::mode::{Mode, ModeConfig};
use crate::names::NameRegistry;
use crate::service::{ClaudeService, GenerationService};
use crate::stages::{
    Categorization, Categorizer, JudgeReport, PlanGenerator, PlanJudge, QualityJudge, Refiner,
    Story, StoryGenerator, StoryPlan,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Hero name for the templated story when no names were reserved.
const FALLBACK_HERO: &str = "Pip";

/// Final output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub story: String,
    pub category: String,
    pub themes: Vec<String>,
    pub tone: String,
    /// Overall score of the last judge report; `None` if never judged.
    pub final_score: Option<f64>,
    pub metadata: RunMetadata,
    pub judge_history: Vec<JudgeReport>,
}

/// How a run went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub mode: Mode,
    /// Every generation call made, whichever stage issued it.
    pub total_api_calls: usize,
    /// Refinement rounds performed.
    pub iterations: u32,
    /// Approach of the chosen plan; `None` without multi-plan selection.
    pub plan_used: Option<String>,
    /// "multi-plan" or "single-plan".
    pub plan_strategy: String,
    pub plan_reasoning: Option<String>,
    pub names: Vec<String>,
    /// The story is the templated fallback.
    pub degraded: bool,
    pub max_iterations_reached: bool,
    /// Refinement stopped because the call budget ran out.
    pub budget_exhausted: bool,
    /// Stages that fell back to a default.
    pub fallbacks: Vec<String>,
    pub word_count: usize,
}

impl RunMetadata {
    fn new(run_id: Uuid, mode: Mode) -> Self {
        Self {
            run_id,
            mode,
            total_api_calls: 0,
            iterations: 0,
            plan_used: None,
            plan_strategy: "single-plan".to_string(),
            plan_reasoning: None,
            names: Vec::new(),
            degraded: false,
            max_iterations_reached: false,
            budget_exhausted: false,
            fallbacks: Vec::new(),
            word_count: 0,
        }
    }
}

impl PipelineResult {
    fn failure(error: impl Into<String>, metadata: RunMetadata) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            story: String::new(),
            category: String::new(),
            themes: Vec::new(),
            tone: String::new(),
            final_score: None,
            metadata,
            judge_history: Vec::new(),
        }
    }
}

/// Controller states after categorization.
enum Step {
    ReserveNames,
    Plan,
    Generate(StoryPlan),
    Judge(Story),
    Refine(Story, JudgeReport),
    Accept(Story),
}

/// Intra-run state threaded through the steps.
struct Run<'a> {
    request: &'a str,
    settings: ModeConfig,
    service: MeteredService,
    categorization: Categorization,
    history: Vec<JudgeReport>,
    metadata: RunMetadata,
}

impl Run<'_> {
    fn fell_back(&mut self, stage: &str) {
        self.metadata.fallbacks.push(stage.to_string());
    }
}

/// Turns story requests into finished stories.
#[derive(Clone)]
pub struct Pipeline {
    service: Arc<dyn GenerationService>,
    registry: Arc<NameRegistry>,
    config: PipelineConfig,
    categorizer: Categorizer,
    planner: PlanGenerator,
    plan_judge: PlanJudge,
    storyteller: StoryGenerator,
    judge: QualityJudge,
    refiner: Refiner,
}

impl Pipeline {
    /// Create a pipeline with the default configuration.
    pub fn new(service: Arc<dyn GenerationService>, registry: Arc<NameRegistry>) -> Self {
        Self::with_config(service, registry, PipelineConfig::default())
    }

    pub fn with_config(
        service: Arc<dyn GenerationService>,
        registry: Arc<NameRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            categorizer: Categorizer::from_config(&config),
            planner: PlanGenerator::from_config(&config),
            plan_judge: PlanJudge::from_config(&config),
            storyteller: StoryGenerator::from_config(&config),
            judge: QualityJudge::from_config(&config),
            refiner: Refiner::from_config(&config),
            service,
            registry,
            config,
        }
    }

    /// Create from environment: `BEDTIME_*` settings and `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = PipelineConfig::from_env()?;

        let mut service = ClaudeService::from_env().map_err(|_| ConfigError::NoApiKey)?;
        if let Some(ref model) = config.model {
            service = service.with_model(model);
        }

        let registry = match config.registry_capacity {
            Some(capacity) => NameRegistry::with_capacity(capacity),
            None => NameRegistry::new(),
        };

        Ok(Self::with_config(
            Arc::new(service),
            Arc::new(registry),
            config,
        ))
    }

    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one request to completion.
    ///
    /// Always returns a complete result; `success` is false only when the
    /// request is empty or the first generation call fails.
    pub async fn run(&self, request: &str, mode: Mode) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id, mode = mode.as_str());
        self.execute(request.trim(), mode, run_id)
            .instrument(span)
            .await
    }

    async fn execute(&self, request: &str, mode: Mode, run_id: Uuid) -> PipelineResult {
        let metadata = RunMetadata::new(run_id, mode);
        if request.is_empty() {
            warn!("empty story request");
            return PipelineResult::failure("story request is required", metadata);
        }

        let settings = mode.config();
        let service = MeteredService::new(self.service.clone(), settings.call_budget);
        info!(budget = settings.call_budget, "starting run");

        let categorization = match self.categorizer.categorize(request, &service).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "first call failed, aborting run");
                let mut metadata = metadata;
                metadata.total_api_calls = service.budget().used();
                return PipelineResult::failure(e.to_string(), metadata);
            }
        };
        info!(
            category = %categorization.value.category,
            fallback = categorization.fell_back,
            "categorized"
        );

        let mut run = Run {
            request,
            settings,
            service,
            categorization: categorization.value,
            history: Vec::new(),
            metadata,
        };
        if categorization.fell_back {
            run.fell_back("categorize");
        }

        let mut step = Step::ReserveNames;
        let story = loop {
            step = match step {
                Step::ReserveNames => self.reserve_names(&mut run).await,
                Step::Plan => self.plan(&mut run).await,
                Step::Generate(plan) => self.generate(&mut run, &plan).await,
                Step::Judge(story) => self.judge(&mut run, story).await,
                Step::Refine(story, report) => self.refine(&mut run, story, &report).await,
                Step::Accept(story) => break story,
            };
        };

        self.assemble(run, story)
    }

    async fn reserve_names(&self, run: &mut Run<'_>) -> Step {
        // A name retry never takes a call the main path needs.
        let reserved = run.settings.calls_after_names();
        let batch = self
            .registry
            .reserve(
                &run.categorization,
                self.config.names_per_story,
                &run.service,
                reserved,
            )
            .await;

        info!(names = ?batch.names, source = ?batch.source, "names reserved");
        if batch.fell_back() {
            run.fell_back("names");
        }
        run.metadata.names = batch.names;
        Step::Plan
    }

    async fn plan(&self, run: &mut Run<'_>) -> Step {
        if !run.settings.multi_plan || !run.service.budget().can_afford(2, 1) {
            return Step::Generate(StoryPlan::implicit(run.request, &run.categorization));
        }

        let plans = self
            .planner
            .generate(run.request, &run.categorization, &run.service)
            .await;
        if plans.fell_back {
            run.fell_back("plans");
        }

        let selection = self
            .plan_judge
            .select(run.request, &plans.value, &run.service)
            .await;
        if selection.fell_back {
            run.fell_back("plan_judge");
        }

        let selection = selection.value;
        let chosen = plans
            .value
            .into_iter()
            .nth(selection.chosen)
            .unwrap_or_else(|| StoryPlan::implicit(run.request, &run.categorization));

        info!(plan = chosen.label(), reasoning = %selection.reasoning, "plan selected");
        run.metadata.plan_strategy = "multi-plan".to_string();
        run.metadata.plan_used = Some(chosen.label().to_string());
        run.metadata.plan_reasoning = Some(selection.reasoning);
        Step::Generate(chosen)
    }

    async fn generate(&self, run: &mut Run<'_>, plan: &StoryPlan) -> Step {
        // Story plus at least one judge call, or the story ships unjudged.
        let unjudged = !run.service.budget().can_afford(2, 0);

        match self
            .storyteller
            .generate(
                run.request,
                &run.categorization,
                plan,
                &run.metadata.names,
                unjudged,
                &run.service,
            )
            .await
        {
            Ok(story) => {
                info!(words = story.word_count, "story generated");
                Step::Judge(story)
            }
            Err(e) => {
                warn!(error = %e, "story generation failed, using templated story");
                let hero = run
                    .metadata
                    .names
                    .first()
                    .map_or(FALLBACK_HERO, String::as_str);
                let story = Story::templated(run.request, hero);
                run.metadata.degraded = true;
                run.fell_back("story");
                Step::Accept(story)
            }
        }
    }

    async fn judge(&self, run: &mut Run<'_>, story: Story) -> Step {
        if !run.service.budget().can_afford(1, 0) {
            info!("no budget left to judge, accepting story");
            return Step::Accept(story);
        }

        // A format retry leaves a refiner call and a re-judge per round left.
        let rounds_left = run
            .settings
            .max_iterations
            .saturating_sub(run.metadata.iterations);
        let outcome = self
            .judge
            .evaluate(
                &story,
                &run.categorization,
                &run.service,
                2 * rounds_left as usize,
            )
            .await;
        if outcome.fell_back {
            run.fell_back("judge");
        }

        let report = outcome.value;
        info!(
            score = report.overall,
            issues = report.issues.len(),
            fallback = report.fallback,
            calls_used = run.service.budget().used(),
            "story judged"
        );
        run.history.push(report.clone());

        if report.accepts(self.config.accept_threshold) {
            return Step::Accept(story);
        }

        if run.metadata.iterations >= run.settings.max_iterations {
            run.metadata.max_iterations_reached = true;
            return Step::Accept(story);
        }

        // A round is the refiner call plus the re-judge.
        if !run.service.budget().can_afford(2, 0) {
            warn!(
                calls_used = run.service.budget().used(),
                "call budget exhausted before refinement"
            );
            run.metadata.budget_exhausted = true;
            return Step::Accept(story);
        }

        Step::Refine(story, report)
    }

    async fn refine(&self, run: &mut Run<'_>, story: Story, report: &JudgeReport) -> Step {
        run.metadata.iterations += 1;
        let outcome = self.refiner.refine(&story, report, &run.service).await;

        if outcome.fell_back {
            run.fell_back("refine");
            return Step::Accept(outcome.value);
        }

        info!(
            iteration = run.metadata.iterations,
            words = outcome.value.word_count,
            "story refined"
        );
        Step::Judge(outcome.value)
    }

    fn assemble(&self, run: Run<'_>, story: Story) -> PipelineResult {
        let Run {
            service,
            categorization,
            history,
            mut metadata,
            ..
        } = run;

        metadata.total_api_calls = service.budget().used();
        metadata.word_count = story.word_count;
        let final_score = history.last().map(|r| r.overall);

        info!(
            calls = metadata.total_api_calls,
            iterations = metadata.iterations,
            score = ?final_score,
            degraded = metadata.degraded,
            "run complete"
        );

        PipelineResult {
            success: true,
            error: None,
            story: story.text,
            category: categorization.category.to_string(),
            themes: categorization.themes,
            tone: categorization.tone,
            final_score,
            metadata,
            judge_history: history,
        }
    }
}
