pub mod budget;
pub mod dependency;
pub mod edge;
pub mod error;
pub mod id;
pub mod matching;
pub mod plan;
pub mod types;

// Re-export commonly used types
pub use budget::Block;
pub use dependency::{DependencyGraph, DependencyNode, ExternalImport, NodeEdit};
pub use edge::{PlanEdge, Relationship};
pub use error::CoreError;
pub use id::CodeUnitId;
pub use plan::{PlanGraph, PlanNode, PlanNodeKind, PlanNodeStatus, PlanNodeUpdate, PlanSeed};
pub use types::{BuildError, ErrorMessage, PackageUpgrade, Replacement, ReplacementsResult};
