//! Transport-safe rendering of run events.
//!
//! Each [`RunEvent`] maps onto `{type, status?, data?}` with graphs exported
//! as plain node and edge lists. No logic beyond the mapping lives here.

use serde::Serialize;
use serde_json::{json, Value};

use bumpfix_core::{DependencyGraph, PlanGraph};

use crate::events::{EventSink, PhaseResult, PlanExecution, RunEvent};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializableEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&RunEvent> for SerializableEvent {
    fn from(event: &RunEvent) -> Self {
        match event {
            RunEvent::Started(phase) => SerializableEvent {
                event_type: phase.as_str().to_string(),
                status: Some("started".to_string()),
                data: None,
            },
            RunEvent::Finished(result) => SerializableEvent {
                event_type: result.phase().as_str().to_string(),
                status: Some("finished".to_string()),
                data: Some(phase_data(result)),
            },
            RunEvent::Complete => SerializableEvent {
                event_type: "complete".to_string(),
                status: None,
                data: None,
            },
            RunEvent::Failed { reason, errors } => SerializableEvent {
                event_type: "failed".to_string(),
                status: None,
                data: Some(json!({ "reason": reason, "errors": errors })),
            },
            RunEvent::Error { message } => SerializableEvent {
                event_type: "error".to_string(),
                status: None,
                data: Some(json!({ "message": message })),
            },
        }
    }
}

fn phase_data(result: &PhaseResult) -> Value {
    match result {
        PhaseResult::UpgradeApply(upgrade) => json!(upgrade),
        PhaseResult::BuildGetErrors(errors) => json!(errors),
        PhaseResult::GraphInitialize { dependency, plan } => json!({
            "graph": {
                "dependency": dependency_graph_json(dependency),
                "plan": plan_graph_json(plan),
            }
        }),
        PhaseResult::GraphPlanExecute { plan, execution } => json!({
            "graph": { "plan": plan_graph_json(plan) },
            "result": execution.as_ref().map(execution_json),
        }),
    }
}

fn execution_json(execution: &PlanExecution) -> Value {
    json!({
        "planNode": execution.plan_node,
        "replacements": execution.replacements,
        "commitMessage": execution.commit_message,
    })
}

pub fn dependency_graph_json(graph: &DependencyGraph) -> Value {
    let nodes: Vec<&bumpfix_core::DependencyNode> = graph.nodes().collect();
    let edges: Vec<Value> = graph
        .edges()
        .map(|(source, target, relationship)| {
            json!({ "source": source, "target": target, "relationship": relationship })
        })
        .collect();
    json!({ "nodes": nodes, "edges": edges })
}

pub fn plan_graph_json(graph: &PlanGraph) -> Value {
    let nodes: Vec<&bumpfix_core::PlanNode> = graph.nodes().collect();
    let edges: Vec<Value> = graph
        .edges()
        .map(|(source, target)| {
            json!({ "source": source, "target": target, "relationship": "referencedBy" })
        })
        .collect();
    json!({ "nodes": nodes, "edges": edges })
}

/// Sink that hands serialized events to `consumer`.
pub struct SerializingSink<F> {
    consumer: F,
}

impl<F> SerializingSink<F>
where
    F: FnMut(SerializableEvent) + Send,
{
    pub fn new(consumer: F) -> Self {
        Self { consumer }
    }
}

impl<F> EventSink for SerializingSink<F>
where
    F: FnMut(SerializableEvent) + Send,
{
    fn emit(&mut self, event: RunEvent) {
        (self.consumer)(SerializableEvent::from(&event));
    }
}
