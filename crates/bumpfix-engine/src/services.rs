//! Collaborator traits the orchestration loop drives.
//!
//! The loop never touches a compiler, a package manager, an AST or a model
//! directly; it goes through these traits. Shipped implementations live in
//! [`crate::filesystem`], [`crate::llm_provider`] and [`crate::typescript`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bumpfix_core::{
    BuildError, DependencyGraph, DependencyNode, PackageUpgrade, PlanNode, Replacement,
    ReplacementsResult,
};

use crate::error::EngineError;

/// Runs the project's build/type-check.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Diagnostics for the project, with third-party and vendored code
    /// already filtered out.
    async fn get_errors(&self, project_root: &Path) -> Result<Vec<BuildError>, EngineError>;
}

/// Reads and rewrites the project manifest.
#[async_trait]
pub trait PackageService: Send + Sync {
    /// Dependencies with a newer major version available.
    async fn list(&self, project_root: &Path) -> Result<Vec<PackageUpgrade>, EngineError>;

    /// Bumps the manifest and installs. Returns the applied upgrade.
    async fn apply(
        &self,
        project_root: &Path,
        upgrade: &PackageUpgrade,
    ) -> Result<PackageUpgrade, EngineError>;
}

/// Language front end: parsing, type signatures and graph maintenance.
#[async_trait]
pub trait AstService: Send + Sync {
    async fn initialize_dependency_graph(
        &self,
        project_root: &Path,
    ) -> Result<DependencyGraph, EngineError>;

    /// Current signature of `node`, or `""` when unknown.
    fn type_signature(&self, node: &DependencyNode) -> String;

    /// Re-parses the file of `changed` and updates `graph` in place. Ids of
    /// units that survive the change must stay the same.
    async fn recompute_after_change(
        &self,
        graph: &mut DependencyGraph,
        changed: &PlanNode,
        replacements: &[Replacement],
    ) -> Result<(), EngineError>;

    fn is_imported_from_external_package(&self, node: &DependencyNode, package: &str) -> bool {
        node.external
            .as_ref()
            .is_some_and(|external| external.imported_from == package)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

/// One prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmService: Send + Sync {
    /// Asks the model for replacements. Malformed model output is an empty
    /// result with an explanatory commit message, not an error.
    async fn get_replacements(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<ReplacementsResult, EngineError>;
}

#[async_trait]
pub trait FilesystemService: Send + Sync {
    async fn read(&self, path: &Path) -> Result<String, EngineError>;
    async fn write(&self, path: &Path, content: &str) -> Result<(), EngineError>;
}

/// The full set of collaborators for one run.
#[derive(Clone)]
pub struct Services {
    pub build: Arc<dyn BuildService>,
    pub package: Arc<dyn PackageService>,
    pub ast: Arc<dyn AstService>,
    pub llm: Arc<dyn LlmService>,
    pub filesystem: Arc<dyn FilesystemService>,
}
