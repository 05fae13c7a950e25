
use crate::core::plan::{EdgeType, GraphEdge, GraphNode, WorkflowGraph};

pub(super) fn agent(id: &str, label: &str, parent: Option<&str>) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        kind: "agent".to_string(),
        label: Some(label.to_string()),
        config: serde_json::json!({}),
        parent_id: parent.map(str::to_string),
    }
}

pub(super) fn node(id: &str, kind: &str) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        kind: kind.to_string(),
        label: None,
        config: serde_json::Value::Null,
        parent_id: None,
    }
}

pub(super) fn edge(source: &str, target: &str, kind: EdgeType) -> GraphEdge {
    GraphEdge {
        id: format!("{}->{}", source, target),
        source: source.to_string(),
        target: target.to_string(),
        kind,
    }
}

pub(super) fn graph(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> WorkflowGraph {
    WorkflowGraph { nodes, edges }
}
