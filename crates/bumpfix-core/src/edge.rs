//! Edge types for both graph layers.
//!
//! The dependency graph uses [`Relationship`] to describe how two code units
//! relate. The plan graph uses [`PlanEdge`], which always points from the
//! node whose edit created an obligation to the obligated node.

use serde::{Deserialize, Serialize};

/// Relationship carried by a dependency graph edge.
///
/// `source -ReferencedBy-> target` means `target` references `source`.
/// `source -ImportDeclaration-> target` means `target` is an import
/// declaration that `source` depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    ReferencedBy,
    ImportDeclaration,
}

/// Plan graph edge, directed parent -> child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub relationship: Relationship,
}

impl PlanEdge {
    /// The only relationship a plan edge carries today.
    pub fn referenced_by() -> Self {
        PlanEdge {
            relationship: Relationship::ReferencedBy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&Relationship::ReferencedBy).unwrap(),
            "\"referencedBy\""
        );
        assert_eq!(
            serde_json::to_string(&Relationship::ImportDeclaration).unwrap(),
            "\"importDeclaration\""
        );
    }

    #[test]
    fn plan_edge_is_referenced_by() {
        assert_eq!(
            PlanEdge::referenced_by().relationship,
            Relationship::ReferencedBy
        );
    }
}
