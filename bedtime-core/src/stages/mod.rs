//! The generation and evaluation stages.
//!
//! Each stage issues its calls through the run's
//! [`MeteredService`](crate::budget::MeteredService) and owns its fallback
//! policy. Only the categorizer surfaces a service failure to the controller;
//! every other stage degrades to something usable.

mod categorize;
mod judge;
mod plan;
mod refine;
mod story;

pub use categorize::{Categorization, Categorizer, Category};
pub use judge::{DimensionScores, Issue, JudgeReport, QualityJudge, Severity};
pub use plan::{Approach, PlanGenerator, PlanJudge, PlanScores, PlanSelection, StoryPlan};
pub use refine::Refiner;
pub use story::{Story, StoryError, StoryGenerator};

/// A stage result plus whether the stage had to fall back to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub fell_back: bool,
}

impl<T> Outcome<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            fell_back: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            fell_back: true,
        }
    }
}
