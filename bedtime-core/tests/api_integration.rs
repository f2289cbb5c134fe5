//! Integration tests that call the real Claude API.
//!
//! These tests require ANTHROPIC_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p bedtime-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid API costs in CI and test
//! failures when no API key is available.

use bedtime_core::{Category, Mode, Pipeline};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

#[tokio::test]
#[ignore] // Run with: cargo test -p bedtime-core --test api_integration -- --ignored
async fn test_fast_mode_real_story() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let pipeline = Pipeline::from_env().expect("Failed to create pipeline");
    let result = pipeline.run("a story about a brave rabbit", Mode::Fast).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.metadata.total_api_calls, 2);
    assert!(Category::parse(&result.category).is_some());
    assert!(result.story.split_whitespace().count() > 100);
    println!("{}", result.story);
}

#[tokio::test]
#[ignore]
async fn test_balanced_mode_real_story_is_judged() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let pipeline = Pipeline::from_env().expect("Failed to create pipeline");
    let result = pipeline
        .run("two friends build a blanket fort on a rainy night", Mode::Balanced)
        .await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert!(!result.judge_history.is_empty());
    assert!(result.metadata.total_api_calls <= 9);
    assert!(result.metadata.plan_used.is_some());
    assert_eq!(result.metadata.names.len(), 3);

    println!(
        "score {:?} after {} iteration(s), names {:?}",
        result.final_score, result.metadata.iterations, result.metadata.names
    );
}

#[tokio::test]
#[ignore]
async fn test_names_stay_unique_across_real_runs() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let pipeline = Pipeline::from_env().expect("Failed to create pipeline");
    let first = pipeline.run("a dragon who is afraid of the dark", Mode::Balanced).await;
    let second = pipeline.run("a dragon who loves to bake", Mode::Balanced).await;

    for name in &second.metadata.names {
        assert!(
            !first
                .metadata
                .names
                .iter()
                .any(|n| n.eq_ignore_ascii_case(name)),
            "{name} was reused"
        );
    }
}
