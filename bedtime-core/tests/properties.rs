//! Property tests for scoring and the controller's bounds.

use bedtime_core::stages::DimensionScores;
use bedtime_core::testing::{self, ScriptedService};
use bedtime_core::{JudgeReport, Mode, NameRegistry, Pipeline, PromptRole};
use proptest::prelude::*;
use std::sync::Arc;

fn mode_strategy() -> impl Strategy<Value = Mode> {
    prop_oneof![Just(Mode::Fast), Just(Mode::Balanced), Just(Mode::Best)]
}

proptest! {
    #[test]
    fn overall_is_clamped_mean(
        a in -20.0f64..30.0,
        b in -20.0f64..30.0,
        c in -20.0f64..30.0,
        d in -20.0f64..30.0,
        e in -20.0f64..30.0,
    ) {
        let report = JudgeReport::from_scores(DimensionScores {
            age_appropriateness: a,
            engagement: b,
            structure: c,
            educational_value: d,
            bedtime_suitability: e,
        });

        prop_assert!((0.0..=10.0).contains(&report.overall));
        let mean = report.scores.values().iter().sum::<f64>() / 5.0;
        prop_assert!((report.overall - mean).abs() < 1e-9);
        prop_assert!(report.scores.values().iter().all(|v| (0.0..=10.0).contains(v)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn runs_respect_mode_bounds(
        mode in mode_strategy(),
        scores in prop::collection::vec(0.0f64..10.0, 3),
    ) {
        let mut service = ScriptedService::new();
        for score in &scores {
            service = service.with_reply(PromptRole::Judge, testing::judge_reply(*score));
        }
        let service = Arc::new(service);
        let pipeline = Pipeline::new(service.clone(), Arc::new(NameRegistry::new()));

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(pipeline.run("a brave rabbit", mode));
        let settings = mode.config();

        prop_assert!(result.success);
        prop_assert_eq!(result.metadata.total_api_calls, service.call_count());
        prop_assert!(service.call_count() <= settings.call_budget);
        prop_assert!(result.metadata.iterations <= settings.max_iterations);
        if let Some(score) = result.final_score {
            prop_assert!((0.0..=10.0).contains(&score));
        }
        if mode == Mode::Fast {
            prop_assert_eq!(service.call_count(), 2);
        }

        let first_judged = result.judge_history.first().map(|r| r.overall);
        if first_judged.is_some_and(|s| s >= 7.5) {
            prop_assert_eq!(result.metadata.iterations, 0);
        }
    }
}
