//! PlanGraph: the DAG of code units scheduled for repair.
//!
//! Seeds come straight from build diagnostics. When an edit changes a unit's
//! type signature, every unit that referenced it becomes an obligation: a
//! `Descendant` node hanging off the edited node. The graph only grows within
//! one outer iteration; nothing is ever removed.
//!
//! Acyclicity holds by construction: [`PlanGraph::add_obligation`] refuses
//! any edge that would close a cycle, before touching the graph.
//! Scheduling is Kahn's algorithm with ties broken by insertion order, so
//! the pending node picked next is deterministic.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::dependency::DependencyNode;
use crate::edge::PlanEdge;
use crate::error::CoreError;
use crate::id::CodeUnitId;
use crate::types::{ErrorMessage, Replacement};

/// Why a node is in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlanNodeKind {
    /// Created from build diagnostics.
    #[serde(rename_all = "camelCase")]
    Seed { error_messages: Vec<ErrorMessage> },
    /// Created because a parent's edit changed its signature.
    Descendant,
}

/// Pending until the node has been handed to the model once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PlanNodeStatus {
    Pending,
    Completed { replacements: Vec<Replacement> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub id: CodeUnitId,
    pub block: String,
    pub path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_signature: Option<String>,
    #[serde(flatten)]
    pub kind: PlanNodeKind,
    #[serde(flatten)]
    pub status: PlanNodeStatus,
}

impl PlanNode {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, PlanNodeStatus::Pending)
    }

    pub fn is_seed(&self) -> bool {
        matches!(self.kind, PlanNodeKind::Seed { .. })
    }

    /// Diagnostics attached to a seed; empty for descendants.
    pub fn error_messages(&self) -> &[ErrorMessage] {
        match &self.kind {
            PlanNodeKind::Seed { error_messages } => error_messages,
            PlanNodeKind::Descendant => &[],
        }
    }

    /// Replacements recorded at completion; empty while pending.
    pub fn replacements(&self) -> &[Replacement] {
        match &self.status {
            PlanNodeStatus::Completed { replacements } => replacements,
            PlanNodeStatus::Pending => &[],
        }
    }

    fn descendant_of(node: &DependencyNode) -> Self {
        PlanNode {
            id: node.id.clone(),
            block: node.block.clone(),
            path: node.path.clone(),
            start_line: node.start_line,
            end_line: node.end_line,
            type_signature: node.type_signature.clone(),
            kind: PlanNodeKind::Descendant,
            status: PlanNodeStatus::Pending,
        }
    }
}

/// Input to [`PlanGraph::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSeed {
    pub id: CodeUnitId,
    pub block: String,
    pub path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub type_signature: Option<String>,
    pub error_messages: Vec<ErrorMessage>,
}

impl PlanSeed {
    pub fn from_dependency(node: &DependencyNode, error_messages: Vec<ErrorMessage>) -> Self {
        PlanSeed {
            id: node.id.clone(),
            block: node.block.clone(),
            path: node.path.clone(),
            start_line: node.start_line,
            end_line: node.end_line,
            type_signature: node.type_signature.clone(),
            error_messages,
        }
    }
}

/// Partial update merged into an existing node. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanNodeUpdate {
    pub block: Option<String>,
    pub path: Option<PathBuf>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub type_signature: Option<String>,
}

impl PlanNodeUpdate {
    /// Refreshes a plan node from its recomputed dependency node.
    pub fn from_dependency(node: &DependencyNode, type_signature: Option<String>) -> Self {
        PlanNodeUpdate {
            block: Some(node.block.clone()),
            path: Some(node.path.clone()),
            start_line: Some(node.start_line),
            end_line: Some(node.end_line),
            type_signature,
        }
    }
}

/// The plan DAG, edges directed parent -> obligated child.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanGraph {
    graph: StableGraph<PlanNode, PlanEdge, Directed, u32>,
    index: HashMap<CodeUnitId, NodeIndex<u32>>,
}

impl PlanGraph {
    /// Builds a graph of pending seed nodes with no edges, in input order.
    /// A repeated id keeps the first seed.
    pub fn initialize(seeds: impl IntoIterator<Item = PlanSeed>) -> Self {
        let mut plan = PlanGraph::default();
        for seed in seeds {
            if plan.index.contains_key(&seed.id) {
                continue;
            }
            let node = PlanNode {
                id: seed.id.clone(),
                block: seed.block,
                path: seed.path,
                start_line: seed.start_line,
                end_line: seed.end_line,
                type_signature: seed.type_signature,
                kind: PlanNodeKind::Seed {
                    error_messages: seed.error_messages,
                },
                status: PlanNodeStatus::Pending,
            };
            let idx = plan.graph.add_node(node);
            plan.index.insert(seed.id, idx);
        }
        plan
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Records that `parent`'s edit obliges `node` to be revisited.
    ///
    /// The node is inserted as a pending descendant if absent (an existing
    /// node keeps its kind and status) and `parent -> node` is added unless
    /// that edge already exists. Fails with [`CoreError::Cycle`] if the edge
    /// would close a cycle, leaving the graph untouched.
    pub fn add_obligation(
        &mut self,
        node: &DependencyNode,
        parent: &CodeUnitId,
    ) -> Result<(), CoreError> {
        let parent_idx = self.index_of(parent)?;

        if let Some(&child_idx) = self.index.get(&node.id) {
            if child_idx == parent_idx || self.reaches(child_idx, parent_idx) {
                return Err(CoreError::Cycle {
                    parent: parent.clone(),
                    child: node.id.clone(),
                });
            }
            if self.graph.find_edge(parent_idx, child_idx).is_none() {
                self.graph
                    .add_edge(parent_idx, child_idx, PlanEdge::referenced_by());
            }
            return Ok(());
        }

        let child_idx = self.graph.add_node(PlanNode::descendant_of(node));
        self.index.insert(node.id.clone(), child_idx);
        self.graph
            .add_edge(parent_idx, child_idx, PlanEdge::referenced_by());
        Ok(())
    }

    /// Merges the set fields of `update` into the node.
    pub fn update(
        &mut self,
        id: &CodeUnitId,
        update: PlanNodeUpdate,
    ) -> Result<&PlanNode, CoreError> {
        let idx = self.index_of(id)?;
        let node = &mut self.graph[idx];
        if let Some(block) = update.block {
            node.block = block;
        }
        if let Some(path) = update.path {
            node.path = path;
        }
        if let Some(start_line) = update.start_line {
            node.start_line = start_line;
        }
        if let Some(end_line) = update.end_line {
            node.end_line = end_line;
        }
        if let Some(type_signature) = update.type_signature {
            node.type_signature = Some(type_signature);
        }
        Ok(&self.graph[idx])
    }

    /// Moves the node from pending to completed. Happens once per node.
    pub fn complete(
        &mut self,
        id: &CodeUnitId,
        replacements: Vec<Replacement>,
    ) -> Result<&PlanNode, CoreError> {
        let idx = self.index_of(id)?;
        let node = &mut self.graph[idx];
        if !node.is_pending() {
            return Err(CoreError::AlreadyCompleted { id: id.clone() });
        }
        node.status = PlanNodeStatus::Completed { replacements };
        Ok(&self.graph[idx])
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &CodeUnitId) -> Result<&PlanNode, CoreError> {
        let idx = self.index_of(id)?;
        Ok(&self.graph[idx])
    }

    /// The first pending node in topological order, if any.
    pub fn next_pending(&self) -> Result<Option<&PlanNode>, CoreError> {
        let all: Vec<NodeIndex<u32>> = self.graph.node_indices().collect();
        let order = self.topological_order(&all)?;
        Ok(order
            .into_iter()
            .map(|idx| &self.graph[idx])
            .find(|node| node.is_pending()))
    }

    /// Temporal context for `id`: every node reachable from it along
    /// outbound edges (itself included), in topological order, minus the
    /// last one.
    pub fn node_context(&self, id: &CodeUnitId) -> Result<Vec<&PlanNode>, CoreError> {
        let start = self.index_of(id)?;

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut reached = vec![start];
        while let Some(current) = queue.pop_front() {
            for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(next) {
                    reached.push(next);
                    queue.push_back(next);
                }
            }
        }

        let mut order = self.topological_order(&reached)?;
        order.pop();
        Ok(order.into_iter().map(|idx| &self.graph[idx]).collect())
    }

    /// Direct obligations of `id`, in edge insertion order.
    pub fn children(&self, id: &CodeUnitId) -> Result<Vec<&PlanNode>, CoreError> {
        let idx = self.index_of(id)?;
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (edge.id().index(), edge.target()))
            .collect();
        edges.sort_by_key(|(edge_idx, _)| *edge_idx);
        Ok(edges
            .into_iter()
            .map(|(_, target)| &self.graph[target])
            .collect())
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Edges as `(parent, child)`.
    pub fn edges(&self) -> impl Iterator<Item = (&CodeUnitId, &CodeUnitId)> {
        self.graph
            .edge_references()
            .map(move |edge| (&self.graph[edge.source()].id, &self.graph[edge.target()].id))
    }

    pub fn contains(&self, id: &CodeUnitId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn pending_count(&self) -> usize {
        self.nodes().filter(|node| node.is_pending()).count()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn index_of(&self, id: &CodeUnitId) -> Result<NodeIndex<u32>, CoreError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })
    }

    /// Whether `to` is reachable from `from` along outbound edges.
    fn reaches(&self, from: NodeIndex<u32>, to: NodeIndex<u32>) -> bool {
        let mut visited = HashSet::from([from]);
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Kahn's algorithm over the subgraph induced by `members`. Nodes are
    /// never removed, so index order is insertion order and the min-heap
    /// breaks ties by it.
    fn topological_order(
        &self,
        members: &[NodeIndex<u32>],
    ) -> Result<Vec<NodeIndex<u32>>, CoreError> {
        let member_set: HashSet<NodeIndex<u32>> = members.iter().copied().collect();

        let mut in_degree: HashMap<NodeIndex<u32>, usize> =
            members.iter().map(|&idx| (idx, 0)).collect();
        for &idx in members {
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<NodeIndex<u32>>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if !member_set.contains(&next) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }

        if order.len() != members.len() {
            return Err(CoreError::CycleDetected);
        }
        Ok(order)
    }
}
