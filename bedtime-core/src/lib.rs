//! Budget-aware bedtime story pipeline.
//!
//! This crate provides:
//! - A pipeline controller that turns a free-text request into a finished
//!   story: categorize, reserve names, plan, generate, judge, refine
//! - Three quality modes trading generation calls for quality
//! - A process-wide character name registry that never reissues a name
//! - Registry persistence across restarts
//!
//! # Quick Start
//!
//! ```ignore
//! use bedtime_core::{Mode, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::from_env()?;
//!
//!     let result = pipeline.run("a story about a brave rabbit", Mode::Balanced).await;
//!     println!("{}", result.story);
//!     Ok(())
//! }
//! ```

pub mod budget;
pub mod config;
pub mod mode;
pub mod names;
pub mod persist;
pub mod pipeline;
pub mod service;
pub mod stages;
pub mod testing;

// Primary public API
pub use budget::{CallBudget, MeteredService};
pub use config::{ConfigError, PipelineConfig, DEFAULT_ACCEPT_THRESHOLD};
pub use mode::{Mode, ModeConfig, ParseModeError};
pub use names::{NameBatch, NameRegistry, NameSource};
pub use persist::{load_registry, save_registry, PersistError, SavedRegistry};
pub use pipeline::{Pipeline, PipelineResult, RunMetadata};
pub use service::{ClaudeService, GenerationService, Prompt, PromptRole, Reply, ServiceError};
pub use stages::{Categorization, Category, Issue, JudgeReport, Severity, Story};
pub use testing::ScriptedService;
