//! The dependency graph of code units, as produced by an AST collaborator.
//!
//! [`DependencyGraph`] is a `StableGraph<DependencyNode, Relationship>` plus
//! an id-to-index map. The core only reads it: the AST service builds it and
//! recomputes it after each change, and the orchestration loop queries it for
//! prompt context and obligation targets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::edge::Relationship;
use crate::error::CoreError;
use crate::id::CodeUnitId;
use crate::types::Replacement;

/// Metadata for a unit imported from an external package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalImport {
    pub imported_from: String,
    pub exports: Vec<String>,
}

/// One recorded edit of a code unit, kept across id reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEdit {
    pub replacements: Vec<Replacement>,
    pub caused_errors: Vec<String>,
}

/// A code unit: class, function, variable or import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyNode {
    pub id: CodeUnitId,
    pub kind: String,
    pub name: String,
    pub path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub block: String,
    /// Cached signature from extraction time. May be stale; callers that
    /// need a fresh value ask the AST service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalImport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<NodeEdit>,
}

impl DependencyNode {
    /// Builds a node whose id is derived from `(path, kind, name)`.
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        start_line: usize,
        end_line: usize,
        block: impl Into<String>,
    ) -> Self {
        let kind = kind.into();
        let name = name.into();
        let path = path.into();
        DependencyNode {
            id: CodeUnitId::derive(&path, &kind, &name),
            kind,
            name,
            path,
            start_line,
            end_line,
            block: block.into(),
            type_signature: None,
            external: None,
            edits: Vec::new(),
        }
    }

    pub fn with_external(mut self, imported_from: impl Into<String>, exports: Vec<String>) -> Self {
        self.external = Some(ExternalImport {
            imported_from: imported_from.into(),
            exports,
        });
        self
    }

    pub fn with_type_signature(mut self, signature: impl Into<String>) -> Self {
        self.type_signature = Some(signature.into());
        self
    }

    /// Whether the span of this unit contains the line range.
    pub fn spans(&self, start_line: usize, end_line: usize) -> bool {
        self.start_line <= start_line && self.end_line >= end_line
    }
}

/// Directed graph of code units keyed by [`CodeUnitId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    graph: StableGraph<DependencyNode, Relationship, Directed, u32>,
    index: HashMap<CodeUnitId, NodeIndex<u32>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutation (used by AST collaborators)
    // -----------------------------------------------------------------------

    /// Adds a node unless one with the same id exists. Returns whether the
    /// node was inserted.
    pub fn add_node(&mut self, node: DependencyNode) -> bool {
        if self.index.contains_key(&node.id) {
            return false;
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        true
    }

    /// Adds `source -relationship-> target`. A repeated edge with the same
    /// relationship is ignored.
    pub fn add_edge(
        &mut self,
        source: &CodeUnitId,
        target: &CodeUnitId,
        relationship: Relationship,
    ) -> Result<(), CoreError> {
        let source_idx = self.index_of(source)?;
        let target_idx = self.index_of(target)?;

        let exists = self
            .graph
            .edges_connecting(source_idx, target_idx)
            .any(|edge| *edge.weight() == relationship);
        if !exists {
            self.graph.add_edge(source_idx, target_idx, relationship);
        }
        Ok(())
    }

    /// Removes every node located in `path` together with its edges.
    /// Returns the removed nodes so a collaborator can carry their edit
    /// history over to the re-parsed units.
    pub fn remove_nodes_in_file(&mut self, path: &Path) -> Vec<DependencyNode> {
        let doomed: Vec<NodeIndex<u32>> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph[idx].path == path)
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for idx in doomed {
            if let Some(node) = self.graph.remove_node(idx) {
                self.index.remove(&node.id);
                removed.push(node);
            }
        }
        removed
    }

    /// Mutable access, e.g. for appending to a node's edit history.
    pub fn node_mut(&mut self, id: &CodeUnitId) -> Option<&mut DependencyNode> {
        let idx = *self.index.get(id)?;
        self.graph.node_weight_mut(idx)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node(&self, id: &CodeUnitId) -> Option<&DependencyNode> {
        let idx = *self.index.get(id)?;
        self.graph.node_weight(idx)
    }

    pub fn contains(&self, id: &CodeUnitId) -> bool {
        self.index.contains_key(id)
    }

    /// All nodes, in index order.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// All edges as `(source, target, relationship)`.
    pub fn edges(&self) -> impl Iterator<Item = (&CodeUnitId, &CodeUnitId, Relationship)> {
        self.graph.edge_references().map(move |edge| {
            (
                &self.graph[edge.source()].id,
                &self.graph[edge.target()].id,
                *edge.weight(),
            )
        })
    }

    pub fn nodes_in_file(&self, path: &Path) -> Vec<&DependencyNode> {
        self.nodes().filter(|node| node.path == path).collect()
    }

    /// Nodes in `path` whose span contains `start_line..=end_line`.
    pub fn nodes_in_file_within_range(
        &self,
        path: &Path,
        start_line: usize,
        end_line: usize,
    ) -> Vec<&DependencyNode> {
        self.nodes()
            .filter(|node| node.path == path && node.spans(start_line, end_line))
            .collect()
    }

    /// Targets of outbound edges from `id` whose relationship is listed, in
    /// edge insertion order.
    ///
    /// With `ReferencedBy` this yields the units that reference `id`; with
    /// `ImportDeclaration` it yields the import declarations `id` uses. An
    /// unknown id yields nothing.
    pub fn referencing_nodes(
        &self,
        id: &CodeUnitId,
        relationships: &[Relationship],
    ) -> Vec<&DependencyNode> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| relationships.contains(edge.weight()))
            .map(|edge| (edge.id(), edge.target()))
            .collect();
        edges.sort_by_key(|(edge_id, _)| edge_id.index());

        edges
            .into_iter()
            .map(|(_, target)| &self.graph[target])
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn index_of(&self, id: &CodeUnitId) -> Result<NodeIndex<u32>, CoreError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, path: &str, start: usize, end: usize) -> DependencyNode {
        DependencyNode::new("FunctionDeclaration", name, path, start, end, format!("function {name}() {{}}"))
    }

    #[test]
    fn add_node_ignores_duplicate_ids() {
        let mut graph = DependencyGraph::new();
        assert!(graph.add_node(unit("a", "/p/a.ts", 1, 3)));
        assert!(!graph.add_node(unit("a", "/p/a.ts", 10, 30)));
        assert_eq!(graph.node_count(), 1);
        let id = CodeUnitId::derive(Path::new("/p/a.ts"), "FunctionDeclaration", "a");
        assert_eq!(graph.node(&id).unwrap().start_line, 1);
    }

    #[test]
    fn add_edge_requires_both_nodes_and_dedupes() {
        let mut graph = DependencyGraph::new();
        let a = unit("a", "/p/a.ts", 1, 3);
        let b = unit("b", "/p/b.ts", 1, 3);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        graph.add_node(a);

        let err = graph
            .add_edge(&a_id, &b_id, Relationship::ReferencedBy)
            .unwrap_err();
        assert_eq!(err, CoreError::NodeNotFound { id: b_id.clone() });

        graph.add_node(b);
        graph.add_edge(&a_id, &b_id, Relationship::ReferencedBy).unwrap();
        graph.add_edge(&a_id, &b_id, Relationship::ReferencedBy).unwrap();
        assert_eq!(graph.edge_count(), 1);
        graph.add_edge(&a_id, &b_id, Relationship::ImportDeclaration).unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn referencing_nodes_filters_by_relationship_in_insertion_order() {
        let mut graph = DependencyGraph::new();
        let target = unit("target", "/p/t.ts", 1, 5);
        let first = unit("first", "/p/f.ts", 1, 5);
        let second = unit("second", "/p/s.ts", 1, 5);
        let import = DependencyNode::new("ImportDeclaration", "lib", "/p/t.ts", 1, 1, "import x from 'lib';");
        let ids: Vec<CodeUnitId> = [&target, &first, &second, &import]
            .iter()
            .map(|n| n.id.clone())
            .collect();
        for node in [target, first, second, import] {
            graph.add_node(node);
        }
        graph.add_edge(&ids[0], &ids[1], Relationship::ReferencedBy).unwrap();
        graph.add_edge(&ids[0], &ids[3], Relationship::ImportDeclaration).unwrap();
        graph.add_edge(&ids[0], &ids[2], Relationship::ReferencedBy).unwrap();

        let referrers: Vec<&str> = graph
            .referencing_nodes(&ids[0], &[Relationship::ReferencedBy])
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(referrers, vec!["first", "second"]);

        let imports = graph.referencing_nodes(&ids[0], &[Relationship::ImportDeclaration]);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].name, "lib");

        assert!(graph
            .referencing_nodes(&CodeUnitId::from("missing"), &[Relationship::ReferencedBy])
            .is_empty());
    }

    #[test]
    fn nodes_in_file_within_range_uses_spans() {
        let mut graph = DependencyGraph::new();
        graph.add_node(unit("outer", "/p/a.ts", 1, 20));
        graph.add_node(unit("inner", "/p/a.ts", 5, 8));
        graph.add_node(unit("elsewhere", "/p/b.ts", 1, 20));

        let hits: Vec<&str> = graph
            .nodes_in_file_within_range(Path::new("/p/a.ts"), 6, 6)
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(hits, vec!["outer", "inner"]);
        assert!(graph
            .nodes_in_file_within_range(Path::new("/p/a.ts"), 21, 21)
            .is_empty());
        assert_eq!(graph.nodes_in_file(Path::new("/p/b.ts")).len(), 1);
    }

    #[test]
    fn remove_nodes_in_file_drops_nodes_edges_and_index() {
        let mut graph = DependencyGraph::new();
        let a = unit("a", "/p/a.ts", 1, 3);
        let b = unit("b", "/p/b.ts", 1, 3);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        graph.add_node(a);
        graph.add_node(b);
        graph.add_edge(&a_id, &b_id, Relationship::ReferencedBy).unwrap();

        let removed = graph.remove_nodes_in_file(Path::new("/p/a.ts"));
        assert_eq!(removed.len(), 1);
        assert!(!graph.contains(&a_id));
        assert!(graph.contains(&b_id));
        assert_eq!(graph.edge_count(), 0);
    }
}
