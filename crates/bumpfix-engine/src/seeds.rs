//! Seed selection: from build diagnostics to the initial plan nodes.
//!
//! Each diagnostic is mapped to the code units whose span contains its line.
//! A unit hit by several diagnostics keeps only the earliest-line one.
//! Units tied to the package under upgrade (the unit itself or one of its
//! import declarations comes from it) take precedence: if any exist, only
//! they are seeded.

use std::path::Path;

use indexmap::IndexMap;

use bumpfix_core::{
    BuildError, CodeUnitId, DependencyGraph, DependencyNode, ErrorMessage, PlanSeed, Relationship,
};

use crate::services::AstService;

pub fn select_seeds(
    dependency: &DependencyGraph,
    errors: &[BuildError],
    project_root: &Path,
    package: &str,
    ast: &dyn AstService,
) -> Vec<PlanSeed> {
    let mut external: IndexMap<CodeUnitId, PlanSeed> = IndexMap::new();
    let mut internal: IndexMap<CodeUnitId, PlanSeed> = IndexMap::new();

    for err in errors {
        let path = project_root.join(&err.path);
        let affected = dependency.nodes_in_file_within_range(&path, err.line, err.line);
        if affected.is_empty() {
            tracing::debug!(
                path = %err.path.display(),
                line = err.line,
                "no code unit found for diagnostic"
            );
            continue;
        }

        for node in affected {
            let bucket = if caused_by_package(dependency, node, package, ast) {
                &mut external
            } else {
                &mut internal
            };
            record(bucket, node, err, ast);
        }
    }

    if external.is_empty() {
        internal.into_values().collect()
    } else {
        external.into_values().collect()
    }
}

fn caused_by_package(
    dependency: &DependencyGraph,
    node: &DependencyNode,
    package: &str,
    ast: &dyn AstService,
) -> bool {
    if ast.is_imported_from_external_package(node, package) {
        return true;
    }
    dependency
        .referencing_nodes(&node.id, &[Relationship::ImportDeclaration])
        .into_iter()
        .any(|import| {
            ast.is_imported_from_external_package(import, package) || import.block.contains(package)
        })
}

fn record(
    bucket: &mut IndexMap<CodeUnitId, PlanSeed>,
    node: &DependencyNode,
    err: &BuildError,
    ast: &dyn AstService,
) {
    let message = ErrorMessage::from(err);
    match bucket.get_mut(&node.id) {
        Some(seed) => {
            let earlier = seed
                .error_messages
                .first()
                .map_or(true, |kept| message.line < kept.line);
            if earlier {
                seed.error_messages = vec![message];
            }
        }
        None => {
            let mut seed = PlanSeed::from_dependency(node, vec![message]);
            seed.type_signature = Some(ast.type_signature(node));
            bucket.insert(node.id.clone(), seed);
        }
    }
}
