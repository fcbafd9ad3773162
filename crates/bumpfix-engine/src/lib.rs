//! bumpfix-engine: the upgrade orchestration loop and its collaborators.
//!
//! Drives a project through a major-version dependency bump: apply the
//! upgrade, build, plan repairs over the code units the diagnostics land on,
//! ask a model for replacements, patch files, and repeat until the build is
//! clean or a bound is hit. Progress is reported as a stream of
//! [`events::RunEvent`]s.

pub mod config;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod llm_provider;
pub mod prompt;
pub mod runner;
pub mod seeds;
pub mod serialize;
pub mod services;
pub mod typescript;

pub use config::{LlmConfig, RunConfig};
pub use error::EngineError;
pub use events::{EventSink, FailureReason, Phase, PhaseResult, PlanExecution, RunEvent};
pub use runner::{temperature, RunOutcome, UpgradeGraph, Upgrader};
pub use services::{
    AstService, BuildService, ChatMessage, ChatRole, FilesystemService, LlmService, PackageService,
    Services,
};
