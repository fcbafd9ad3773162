//! The orchestration loop.
//!
//! [`Upgrader::execute`] bumps the package, then alternates between building
//! and repairing until the build is clean or a bound is hit:
//!
//! ```text
//! upgrade.apply
//! build.getErrors
//! while errors remain:
//!     stop if max_iterations or timeout reached
//!     graph.initialize
//!     graph.plan.execute   (until no pending node)
//!     build.getErrors
//! complete | failed
//! ```
//!
//! Everything runs sequentially on the caller's task. Each collaborator call
//! carries its own deadline; the run deadline is checked between outer
//! iterations.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use bumpfix_core::{
    matching, BuildError, CoreError, DependencyGraph, NodeEdit, PackageUpgrade, PlanGraph,
    PlanNode, PlanNodeUpdate, Relationship, ReplacementsResult,
};

use crate::config::RunConfig;
use crate::error::EngineError;
use crate::events::{EventSink, FailureReason, Phase, PhaseResult, PlanExecution, RunEvent};
use crate::prompt::{self, ContextUnit, PromptContext};
use crate::seeds;
use crate::services::Services;

/// Temperature for the first half of the iterations.
pub const BASE_TEMPERATURE: f64 = 0.2;
/// Upper bound of the temperature ramp.
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Sampling temperature for outer iteration `iteration` of `max_iterations`.
///
/// Flat at [`BASE_TEMPERATURE`] for the first half, then grows
/// exponentially and reaches [`MAX_TEMPERATURE`] at `iteration == max_iterations`.
pub fn temperature(iteration: usize, max_iterations: usize) -> f64 {
    let half = max_iterations as f64 / 2.0;
    let i = iteration as f64;
    if i < half || half <= 0.0 {
        return BASE_TEMPERATURE;
    }
    let k = (MAX_TEMPERATURE / BASE_TEMPERATURE).ln() / half;
    (BASE_TEMPERATURE * (k * (i - half)).exp()).min(MAX_TEMPERATURE)
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    Failed(FailureReason),
    Error(String),
}

/// The two graphs of one outer iteration.
#[derive(Debug, Clone)]
pub struct UpgradeGraph {
    pub root: PathBuf,
    pub dependency: DependencyGraph,
    pub plan: PlanGraph,
}

pub struct Upgrader {
    services: Services,
    project_root: PathBuf,
    package: PackageUpgrade,
    config: RunConfig,
}

impl Upgrader {
    pub fn new(
        services: Services,
        project_root: impl Into<PathBuf>,
        package: PackageUpgrade,
        config: RunConfig,
    ) -> Self {
        Self {
            services,
            project_root: project_root.into(),
            package,
            config,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn package(&self) -> &PackageUpgrade {
        &self.package
    }

    /// Runs the whole upgrade, pushing every event into `sink`. Unexpected
    /// errors end the run with a single `Error` event.
    pub async fn execute<S: EventSink + ?Sized>(&self, sink: &mut S) -> RunOutcome {
        match self.run(sink).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = err.to_string();
                tracing::error!(error = %message, "upgrade run aborted");
                sink.emit(RunEvent::Error {
                    message: message.clone(),
                });
                RunOutcome::Error(message)
            }
        }
    }

    /// Drives [`Upgrader::execute`] on a spawned task and streams its events.
    /// The channel closes after the terminal event.
    pub fn spawn_execute(self) -> UnboundedReceiver<RunEvent> {
        let (mut tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            self.execute(&mut tx).await;
        });
        rx
    }

    async fn run<S: EventSink + ?Sized>(&self, sink: &mut S) -> Result<RunOutcome, EngineError> {
        let started = Instant::now();
        tracing::info!(
            package = %self.package.package_name,
            version = %self.package.new_version,
            root = %self.project_root.display(),
            "starting upgrade"
        );

        sink.emit(RunEvent::Started(Phase::UpgradeApply));
        let applied = self
            .deadline(
                Phase::UpgradeApply,
                self.config.build_call_timeout,
                self.services
                    .package
                    .apply(&self.project_root, &self.package),
            )
            .await??;
        sink.emit(RunEvent::Finished(PhaseResult::UpgradeApply(applied)));

        let mut errors = self.build_errors(sink).await?;
        let mut iteration = 0;

        while !errors.is_empty() {
            if iteration >= self.config.max_iterations {
                return Ok(self.fail(sink, FailureReason::MaxIterations, errors));
            }
            if started.elapsed() >= self.config.timeout {
                return Ok(self.fail(sink, FailureReason::Timeout, errors));
            }

            tracing::info!(iteration, errors = errors.len(), "starting repair iteration");

            sink.emit(RunEvent::Started(Phase::GraphInitialize));
            let mut graph = self.initialize_graph(&errors).await?;
            sink.emit(RunEvent::Finished(PhaseResult::GraphInitialize {
                dependency: graph.dependency.clone(),
                plan: graph.plan.clone(),
            }));

            while graph.plan.next_pending()?.is_some() {
                sink.emit(RunEvent::Started(Phase::GraphPlanExecute));
                let execution = self.plan_execute(&mut graph, iteration).await?;
                sink.emit(RunEvent::Finished(PhaseResult::GraphPlanExecute {
                    plan: graph.plan.clone(),
                    execution,
                }));
            }

            iteration += 1;
            errors = self.build_errors(sink).await?;
        }

        tracing::info!(iterations = iteration, "upgrade complete");
        sink.emit(RunEvent::Complete);
        Ok(RunOutcome::Complete)
    }

    fn fail<S: EventSink + ?Sized>(
        &self,
        sink: &mut S,
        reason: FailureReason,
        errors: Vec<BuildError>,
    ) -> RunOutcome {
        tracing::warn!(?reason, remaining = errors.len(), "upgrade stopped with errors remaining");
        sink.emit(RunEvent::Failed { reason, errors });
        RunOutcome::Failed(reason)
    }

    async fn build_errors<S: EventSink + ?Sized>(
        &self,
        sink: &mut S,
    ) -> Result<Vec<BuildError>, EngineError> {
        sink.emit(RunEvent::Started(Phase::BuildGetErrors));
        let errors = self
            .deadline(
                Phase::BuildGetErrors,
                self.config.build_call_timeout,
                self.services.build.get_errors(&self.project_root),
            )
            .await??;
        sink.emit(RunEvent::Finished(PhaseResult::BuildGetErrors(errors.clone())));
        Ok(errors)
    }

    /// Builds the dependency graph and seeds a fresh plan from `errors`.
    pub async fn initialize_graph(&self, errors: &[BuildError]) -> Result<UpgradeGraph, EngineError> {
        let dependency = self
            .deadline(
                Phase::GraphInitialize,
                self.config.build_call_timeout,
                self.services
                    .ast
                    .initialize_dependency_graph(&self.project_root),
            )
            .await??;

        let seeds = seeds::select_seeds(
            &dependency,
            errors,
            &self.project_root,
            &self.package.package_name,
            self.services.ast.as_ref(),
        );
        tracing::debug!(
            units = dependency.node_count(),
            seeds = seeds.len(),
            "plan graph initialized"
        );

        Ok(UpgradeGraph {
            root: self.project_root.clone(),
            dependency,
            plan: PlanGraph::initialize(seeds),
        })
    }

    /// Repairs the next pending node. Returns `None` when nothing is pending.
    pub async fn plan_execute(
        &self,
        graph: &mut UpgradeGraph,
        iteration: usize,
    ) -> Result<Option<PlanExecution>, EngineError> {
        let Some(node) = graph.plan.next_pending()?.cloned() else {
            return Ok(None);
        };
        tracing::debug!(node = %node.id.short(), path = %node.path.display(), "executing plan node");

        let messages = {
            let ast = self.services.ast.as_ref();
            let with_signature = |n: &bumpfix_core::DependencyNode| ContextUnit {
                type_signature: ast.type_signature(n),
                node: n.clone(),
            };

            let spatial: Vec<ContextUnit> = graph
                .dependency
                .referencing_nodes(&node.id, &[Relationship::ReferencedBy])
                .into_iter()
                .map(with_signature)
                .collect();
            let imports: Vec<ContextUnit> = graph
                .dependency
                .referencing_nodes(&node.id, &[Relationship::ImportDeclaration])
                .into_iter()
                .map(with_signature)
                .collect();
            let external: Vec<ContextUnit> = imports
                .iter()
                .filter(|unit| {
                    ast.is_imported_from_external_package(&unit.node, &self.package.package_name)
                })
                .cloned()
                .collect();
            let temporal = graph.plan.node_context(&node.id)?;

            let context = PromptContext {
                package: &self.package.package_name,
                plan_node: &node,
                spatial: &spatial,
                temporal: &temporal,
                imports: &imports,
                external: &external,
            };
            prompt::build_messages(&context, self.config.context_budget)
        };

        let messages = match messages {
            Ok(messages) => messages,
            Err(EngineError::Core(CoreError::BudgetExceeded { deficit })) => {
                tracing::warn!(
                    node = %node.id.short(),
                    deficit,
                    "prompt does not fit the context budget; skipping node"
                );
                let result = ReplacementsResult::empty("skipped: prompt exceeds context budget");
                return self.finish_node(graph, &node, result).map(Some);
            }
            Err(err) => return Err(err),
        };

        let temperature = temperature(iteration, self.config.max_iterations);
        let result = match tokio::time::timeout(
            self.config.llm_call_timeout,
            self.services.llm.get_replacements(&messages, temperature),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    node = %node.id.short(),
                    after_secs = self.config.llm_call_timeout.as_secs(),
                    "model call timed out; completing node without changes"
                );
                ReplacementsResult::empty("skipped: model call timed out")
            }
        };

        if !result.replacements.is_empty() {
            self.apply_replacements(graph, &node, &result).await?;
        }

        self.finish_node(graph, &node, result).map(Some)
    }

    async fn apply_replacements(
        &self,
        graph: &mut UpgradeGraph,
        node: &PlanNode,
        result: &ReplacementsResult,
    ) -> Result<(), EngineError> {
        let filesystem = self.services.filesystem.as_ref();
        let ast = self.services.ast.as_ref();

        let content = filesystem.read(&node.path).await?;
        let patched = result.replacements.iter().fold(content, |acc, replacement| {
            let next = matching::apply(&acc, &replacement.old_code, &replacement.new_code);
            if next == acc {
                tracing::warn!(
                    node = %node.id.short(),
                    old_code = %replacement.old_code,
                    "replacement did not match"
                );
            }
            next
        });
        filesystem.write(&node.path, &patched).await?;

        ast.recompute_after_change(&mut graph.dependency, node, &result.replacements)
            .await?;

        let Some(updated) = graph.dependency.node(&node.id).cloned() else {
            tracing::debug!(node = %node.id.short(), "unit no longer exists after change");
            return Ok(());
        };
        if let Some(unit) = graph.dependency.node_mut(&node.id) {
            unit.edits.push(NodeEdit {
                replacements: result.replacements.clone(),
                caused_errors: node
                    .error_messages()
                    .iter()
                    .map(|e| e.message.clone())
                    .collect(),
            });
        }

        let new_signature = ast.type_signature(&updated);
        let old_signature = node.type_signature.clone().unwrap_or_default();
        graph.plan.update(
            &node.id,
            PlanNodeUpdate::from_dependency(&updated, Some(new_signature.clone())),
        )?;

        if old_signature == new_signature {
            return Ok(());
        }

        let referrers: Vec<_> = graph
            .dependency
            .referencing_nodes(&node.id, &[Relationship::ReferencedBy])
            .into_iter()
            .cloned()
            .collect();
        tracing::debug!(
            node = %node.id.short(),
            obligations = referrers.len(),
            "type signature changed"
        );
        for referrer in referrers {
            let signature = ast.type_signature(&referrer);
            let referrer = referrer.with_type_signature(signature);
            match graph.plan.add_obligation(&referrer, &node.id) {
                Ok(()) => {}
                Err(CoreError::Cycle { parent, child }) => {
                    tracing::warn!(
                        parent = %parent.short(),
                        child = %child.short(),
                        "obligation would create a cycle; skipped"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn finish_node(
        &self,
        graph: &mut UpgradeGraph,
        node: &PlanNode,
        result: ReplacementsResult,
    ) -> Result<PlanExecution, EngineError> {
        let completed = graph
            .plan
            .complete(&node.id, result.replacements.clone())?
            .clone();
        Ok(PlanExecution {
            plan_node: completed,
            replacements: result.replacements,
            commit_message: result.commit_message,
        })
    }

    async fn deadline<T>(
        &self,
        phase: Phase,
        after: Duration,
        fut: impl Future<Output = T>,
    ) -> Result<T, EngineError> {
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| EngineError::Timeout {
                operation: phase.as_str().to_string(),
                after,
            })
    }
}
