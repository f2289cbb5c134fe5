//! Quality modes.
//!
//! A mode is nothing more than a [`ModeConfig`] record; the pipeline runs one
//! state machine and reads every mode-dependent decision from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Trade-off between call budget and story quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Fast,
    #[default]
    Balanced,
    Best,
}

/// What a mode allows the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeConfig {
    /// Generate three plans and let the plan judge pick one.
    pub multi_plan: bool,
    /// Maximum refinement rounds after the first judgement.
    pub max_iterations: u32,
    /// Hard cap on generation calls for one run.
    pub call_budget: usize,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Fast, Mode::Balanced, Mode::Best];

    pub const fn config(self) -> ModeConfig {
        match self {
            Mode::Fast => ModeConfig {
                multi_plan: false,
                max_iterations: 0,
                call_budget: 2,
            },
            Mode::Balanced => ModeConfig {
                multi_plan: true,
                max_iterations: 1,
                call_budget: 9,
            },
            Mode::Best => ModeConfig {
                multi_plan: true,
                max_iterations: 2,
                call_budget: 10,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Fast => "fast",
            Mode::Balanced => "balanced",
            Mode::Best => "best",
        }
    }

    /// One-line description for menus and help text.
    pub fn describe(self) -> &'static str {
        match self {
            Mode::Fast => "single plan, no judging; quickest and cheapest",
            Mode::Balanced => "three plans, judged, up to one refinement",
            Mode::Best => "three plans, judged, up to two refinements",
        }
    }
}

impl ModeConfig {
    /// Calls the main path needs once names are reserved: plans, story, the
    /// first judgement and a refiner plus re-judge for every round.
    pub const fn calls_after_names(&self) -> usize {
        let plans = if self.multi_plan { 2 } else { 0 };
        plans + 2 + 2 * self.max_iterations as usize
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised mode name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown mode '{0}': choose fast, balanced or best")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "1" => Ok(Mode::Fast),
            "balanced" | "2" | "" => Ok(Mode::Balanced),
            "best" | "3" => Ok(Mode::Best),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}
