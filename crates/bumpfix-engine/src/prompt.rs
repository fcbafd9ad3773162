//! Prompt assembly for one plan node.
//!
//! The prompt is six named blocks: `system`, `spatial`, `temporal`,
//! `plan_node`, `external` and `instruction`. Optional blocks are absent
//! when they have nothing to say. The set is fitted to the character budget
//! with [`bumpfix_core::budget::fit`]; `instruction` is never trimmed.

use indexmap::IndexMap;

use bumpfix_core::budget;
use bumpfix_core::{DependencyNode, PlanNode};

use crate::error::EngineError;
use crate::services::ChatMessage;

/// Trim order, least important first.
pub const TRIM_PRIORITY: [&str; 5] = ["spatial", "temporal", "external", "plan_node", "system"];

/// A dependency node paired with its freshly computed type signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextUnit {
    pub node: DependencyNode,
    pub type_signature: String,
}

/// Everything the model sees about one plan node.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub package: &'a str,
    pub plan_node: &'a PlanNode,
    /// Units that reference the plan node.
    pub spatial: &'a [ContextUnit],
    /// Plan nodes whose earlier edits are relevant.
    pub temporal: &'a [&'a PlanNode],
    /// Import declarations the plan node depends on.
    pub imports: &'a [ContextUnit],
    /// Imports that come from the package under upgrade.
    pub external: &'a [ContextUnit],
}

/// Renders and budgets the prompt. Fails with
/// [`bumpfix_core::CoreError::BudgetExceeded`] when even trimming every
/// trimmable block does not fit.
pub fn build_messages(
    context: &PromptContext<'_>,
    budget_chars: usize,
) -> Result<Vec<ChatMessage>, EngineError> {
    let mut blocks: IndexMap<String, Option<String>> = IndexMap::new();
    blocks.insert("system".into(), Some(system_block(context.package)));
    blocks.insert("spatial".into(), spatial_block(context.spatial));
    blocks.insert("temporal".into(), temporal_block(context.temporal));
    blocks.insert(
        "plan_node".into(),
        Some(plan_node_block(context.plan_node, context.imports, context.package)),
    );
    blocks.insert(
        "external".into(),
        external_block(context.external, context.package),
    );
    blocks.insert("instruction".into(), Some(instruction_block()));

    let fitted = budget::fit(budget_chars, blocks, &TRIM_PRIORITY)?;
    Ok(fitted
        .into_iter()
        .map(|block| {
            if block.name == "system" {
                ChatMessage::system(block.content)
            } else {
                ChatMessage::user(block.content)
            }
        })
        .collect())
}

fn system_block(package: &str) -> String {
    [
        format!(
            "You are an expert software engineer fixing one block of code in a TypeScript project. \
             The project is upgrading {package} and the code no longer builds. You will get the \
             code-to-edit, the code around it and the changes made so far.\n"
        ),
        "Think step by step and fix the block only if it needs fixing.".to_string(),
        "- Do not change behavior; only fix the errors.".to_string(),
        "- Do not change hardcoded values.".to_string(),
        "- Do not add comments.".to_string(),
        "- Never cast types explicitly.".to_string(),
        "- Do not change imports unless an error message is about an import.".to_string(),
        "- Do not rename variables, functions or classes.".to_string(),
        "- Assume the rest of the codebase is correct apart from the reported errors.".to_string(),
    ]
    .join("\n")
}

fn spatial_block(spatial: &[ContextUnit]) -> Option<String> {
    if spatial.is_empty() {
        return None;
    }
    let relevant: Vec<String> = spatial
        .iter()
        .map(|unit| {
            format!(
                "<relevant_code type_signature=\"{}\" relationship=\"referencedBy\" file_path=\"{}\">\n{}\n</relevant_code>",
                unit.type_signature,
                unit.node.path.display(),
                unit.node.block
            )
        })
        .collect();
    Some(format!(
        "The code-to-edit is referenced by:\n{}",
        relevant.join("\n")
    ))
}

fn temporal_block(temporal: &[&PlanNode]) -> Option<String> {
    let changed: Vec<String> = temporal
        .iter()
        .filter(|node| !node.replacements().is_empty())
        .map(|node| {
            let diff: Vec<String> = node
                .replacements()
                .iter()
                .map(|replacement| {
                    let mut lines = vec![format!("# Description of Change: {}", replacement.reason)];
                    lines.extend(replacement.old_code.split('\n').map(|l| format!("- {l}")));
                    lines.extend(replacement.new_code.split('\n').map(|l| format!("+ {l}")));
                    lines.join("\n")
                })
                .collect();
            format!(
                "<changed_code file_path=\"{}\">\n{}\n</changed_code>",
                node.path.display(),
                diff.join("\n")
            )
        })
        .collect();

    if changed.is_empty() {
        return None;
    }
    Some(format!(
        "You have previously made these code changes:\n{}",
        changed.join("\n")
    ))
}

fn plan_node_block(node: &PlanNode, imports: &[ContextUnit], package: &str) -> String {
    let mut lines = vec![
        format!(
            "I'm upgrading {package} and my code is failing. Fix the following code block if there \
             is a problem with it. You might need to change the code or the imports, depending on \
             the error message. If there is no related error message, don't make a change unless \
             you absolutely need to.\n"
        ),
        format!(
            "<code path=\"{}\" type_signature=\"{}\">",
            node.path.display(),
            node.type_signature.as_deref().unwrap_or_default()
        ),
    ];
    if !imports.is_empty() {
        lines.extend(imports.iter().map(|unit| unit.node.block.clone()));
        lines.push(String::new());
    }
    lines.push(node.block.clone());
    lines.push("</code>\n".to_string());

    let errors = node.error_messages();
    if !errors.is_empty() {
        lines.push("The block has the following build errors:".to_string());
        lines.push("<errors>".to_string());
        lines.extend(errors.iter().map(|e| format!("\n{}\n", e.message)));
        lines.push("</errors>".to_string());
    }
    lines.join("\n")
}

fn external_block(external: &[ContextUnit], package: &str) -> Option<String> {
    if external.iter().all(|unit| unit.type_signature.is_empty()) {
        return None;
    }
    let mut lines = vec![format!("Type signatures for the imports from {package}:\n")];
    lines.extend(external.iter().map(|unit| {
        format!(
            "<import statement=\"{}\">{}</import>",
            unit.node.block, unit.type_signature
        )
    }));
    Some(lines.join("\n"))
}

fn instruction_block() -> String {
    "Given the above information, use the update_code function to fix the code block. If there \
     are no changes to be made, use the update_code function to return an empty array of \
     replacements."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpfix_core::{
        CoreError, ErrorMessage, PlanGraph, PlanSeed, Replacement,
    };

    use crate::services::ChatRole;

    fn seeded_plan() -> (PlanGraph, bumpfix_core::CodeUnitId) {
        let dep = DependencyNode::new(
            "FunctionDeclaration",
            "main",
            "/proj/src/main.ts",
            1,
            3,
            "function main() {\n  lib.oldFn();\n}",
        );
        let id = dep.id.clone();
        let seed = PlanSeed::from_dependency(
            &dep,
            vec![ErrorMessage {
                message: "Property 'oldFn' does not exist".into(),
                line: 2,
                column: 7,
            }],
        );
        (PlanGraph::initialize(vec![seed]), id)
    }

    fn unit(name: &str, block: &str, signature: &str) -> ContextUnit {
        ContextUnit {
            node: DependencyNode::new("ImportDeclaration", name, "/proj/src/main.ts", 1, 1, block),
            type_signature: signature.to_string(),
        }
    }

    #[test]
    fn renders_all_blocks_in_order() {
        let (mut plan, id) = seeded_plan();
        let imports = vec![unit("lib", "import lib from 'lib';", "typeof lib")];
        let spatial = vec![unit("caller", "main();", "() => void")];

        let other = DependencyNode::new("FunctionDeclaration", "helper", "/proj/src/h.ts", 1, 2, "x");
        plan.add_obligation(&other, &id).unwrap();
        plan.complete(&other.id, vec![Replacement::new("a()", "b()", "renamed a")])
            .unwrap();
        let helper = plan.get(&other.id).unwrap().clone();
        let node = plan.get(&id).unwrap().clone();
        let temporal = vec![&helper];

        let context = PromptContext {
            package: "lib",
            plan_node: &node,
            spatial: &spatial,
            temporal: &temporal,
            imports: &imports,
            external: &imports,
        };
        let messages = build_messages(&context, 28_000).unwrap();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[1].content.contains("<relevant_code"));
        assert!(messages[2].content.contains("# Description of Change: renamed a"));
        assert!(messages[2].content.contains("- a()\n+ b()"));
        assert!(messages[3].content.contains("<code path=\"/proj/src/main.ts\""));
        assert!(messages[3].content.contains("import lib from 'lib';"));
        assert!(messages[3].content.contains("Property 'oldFn' does not exist"));
        assert!(messages[4].content.contains("<import statement=\"import lib from 'lib';\">typeof lib</import>"));
        assert!(messages[5].content.contains("update_code"));
        assert!(messages[1..].iter().all(|m| m.role == ChatRole::User));
    }

    #[test]
    fn optional_blocks_are_omitted() {
        let (plan, id) = seeded_plan();
        let node = plan.get(&id).unwrap();
        let unsigned = vec![unit("lib", "import lib from 'lib';", "")];
        let context = PromptContext {
            package: "lib",
            plan_node: node,
            spatial: &[],
            temporal: &[],
            imports: &[],
            external: &unsigned,
        };
        let messages = build_messages(&context, 28_000).unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn spatial_is_trimmed_before_the_plan_node() {
        let (plan, id) = seeded_plan();
        let node = plan.get(&id).unwrap();
        let big_block: String = (0..400).map(|i| format!("caller_{i}();\n")).collect();
        let spatial = vec![unit("caller", &big_block, "() => void")];
        let context = PromptContext {
            package: "lib",
            plan_node: node,
            spatial: &spatial,
            temporal: &[],
            imports: &[],
            external: &[],
        };
        let messages = build_messages(&context, 2_500).unwrap();
        let total: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        assert!(total <= 2_500);
        assert!(messages
            .iter()
            .any(|m| m.content.contains("Property 'oldFn' does not exist")));
    }

    #[test]
    fn impossible_budget_is_reported() {
        let (plan, id) = seeded_plan();
        let node = plan.get(&id).unwrap();
        let context = PromptContext {
            package: "lib",
            plan_node: node,
            spatial: &[],
            temporal: &[],
            imports: &[],
            external: &[],
        };
        let err = build_messages(&context, 10).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::BudgetExceeded { .. })
        ));
    }
}
