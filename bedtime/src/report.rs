//! Human-readable output.

use bedtime_core::{Mode, PipelineResult};

pub fn print_result(result: &PipelineResult) {
    if !result.success {
        println!(
            "[ERROR] {}",
            result.error.as_deref().unwrap_or("story generation failed")
        );
        return;
    }

    let meta = &result.metadata;

    println!("=== Your Bedtime Story ===");
    println!(
        "Category: {} | Themes: {} | Tone: {}",
        result.category,
        result.themes.join(", "),
        result.tone
    );
    println!();
    for para in result.story.split("\n\n") {
        println!("{para}");
        println!();
    }

    println!("--- Generation details ---");
    println!("  Mode: {}", meta.mode);
    match result.final_score {
        Some(score) => println!("  Quality score: {score:.1}/10"),
        None => println!("  Quality score: not judged"),
    }
    println!("  API calls: {}", meta.total_api_calls);
    println!("  Refinements: {}", meta.iterations);
    println!("  Words: {}", meta.word_count);
    println!("  Plan: {}", meta.plan_used.as_deref().unwrap_or(&meta.plan_strategy));
    if !meta.names.is_empty() {
        println!("  Characters: {}", meta.names.join(", "));
    }
    if meta.degraded {
        println!("  [DEGRADED] The storyteller was unavailable; this is a simple fallback story.");
    }
    if meta.max_iterations_reached {
        println!("  Refinement limit reached before the score threshold.");
    }
    if meta.budget_exhausted {
        println!("  Call budget ran out before refinement could finish.");
    }
    if !meta.fallbacks.is_empty() {
        println!("  Fallbacks: {}", meta.fallbacks.join(", "));
    }
}

pub fn print_modes() {
    println!("{:<10} {:<11} {:<15} {:<12} Description", "Mode", "Multi-plan", "Refinements", "Call budget");
    for mode in Mode::ALL {
        let config = mode.config();
        println!(
            "{:<10} {:<11} {:<15} {:<12} {}",
            mode.as_str(),
            if config.multi_plan { "yes" } else { "no" },
            config.max_iterations,
            config.call_budget,
            mode.describe()
        );
    }
}
