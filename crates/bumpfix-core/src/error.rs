//! Core error types for bumpfix-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the plan graph and the context budgeter. The
//! orchestration loop decides which of these are fatal to a node and which
//! are fatal to a run.

use thiserror::Error;

use crate::id::CodeUnitId;

/// Core errors produced by the bumpfix-core crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Adding the edge `parent -> child` would make the plan graph cyclic.
    #[error("adding obligation {parent} -> {child} would create a cycle")]
    Cycle { parent: CodeUnitId, child: CodeUnitId },

    /// The plan graph is not a DAG. Unreachable while every edge goes through
    /// the cycle guard in `add_obligation`.
    #[error("cycle detected in plan graph")]
    CycleDetected,

    /// An id was not found in the plan graph or the dependency graph.
    #[error("code unit not found: {id}")]
    NodeNotFound { id: CodeUnitId },

    /// A plan node was completed twice.
    #[error("plan node already completed: {id}")]
    AlreadyCompleted { id: CodeUnitId },

    /// The context budgeter ran out of trimmable blocks.
    #[error("context exceeds budget by {deficit} characters after trimming")]
    BudgetExceeded { deficit: usize },
}
