//! Lifecycle events of one upgrade run.
//!
//! Every phase emits `Started` and then `Finished` carrying its result.
//! A run ends with exactly one of `Complete`, `Failed` or `Error`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use bumpfix_core::{BuildError, DependencyGraph, PackageUpgrade, PlanGraph, PlanNode, Replacement};

/// Named phases, rendered with their wire names by [`Phase::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    UpgradeApply,
    BuildGetErrors,
    GraphInitialize,
    GraphPlanExecute,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::UpgradeApply => "upgrade.apply",
            Phase::BuildGetErrors => "build.getErrors",
            Phase::GraphInitialize => "graph.initialize",
            Phase::GraphPlanExecute => "graph.plan.execute",
        }
    }
}

/// Why a run gave up with diagnostics remaining.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    MaxIterations,
    Timeout,
}

/// What one `graph.plan.execute` did to its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanExecution {
    pub plan_node: PlanNode,
    pub replacements: Vec<Replacement>,
    pub commit_message: String,
}

/// Result payload of a finished phase.
#[derive(Debug, Clone)]
pub enum PhaseResult {
    UpgradeApply(PackageUpgrade),
    BuildGetErrors(Vec<BuildError>),
    GraphInitialize {
        dependency: DependencyGraph,
        plan: PlanGraph,
    },
    GraphPlanExecute {
        plan: PlanGraph,
        execution: Option<PlanExecution>,
    },
}

impl PhaseResult {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseResult::UpgradeApply(_) => Phase::UpgradeApply,
            PhaseResult::BuildGetErrors(_) => Phase::BuildGetErrors,
            PhaseResult::GraphInitialize { .. } => Phase::GraphInitialize,
            PhaseResult::GraphPlanExecute { .. } => Phase::GraphPlanExecute,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    Started(Phase),
    Finished(PhaseResult),
    Complete,
    Failed {
        reason: FailureReason,
        errors: Vec<BuildError>,
    },
    Error {
        message: String,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Complete | RunEvent::Failed { .. } | RunEvent::Error { .. }
        )
    }
}

/// Consumer of run events, in emission order.
pub trait EventSink: Send {
    fn emit(&mut self, event: RunEvent);
}

impl EventSink for Vec<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        if self.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}
