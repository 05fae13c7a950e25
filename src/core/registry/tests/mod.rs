mod deployments;

use serde_json::json;

use crate::core::plan::WorkflowGraph;
use crate::core::registry::{NewDeployment, NewOperatorAction, OperatorType, Registry};

pub(super) fn registry() -> Registry {
    Registry::in_memory().unwrap()
}

pub(super) fn new_deployment(slug: &str) -> NewDeployment {
    NewDeployment {
        name: format!("{} system", slug),
        slug: slug.to_string(),
        manifest: json!({"name": slug, "slug": slug, "category": "research"}),
        graph: WorkflowGraph::default(),
        operational_config: json!({"timeoutMs": 120000, "maxMemoryRestart": "256M"}),
        process_name: format!("fleet-{}", slug),
    }
}

pub(super) fn new_action(deployment_id: &str, kind: OperatorType, action: &str) -> NewOperatorAction {
    NewOperatorAction {
        deployment_id: deployment_id.to_string(),
        operator_type: kind,
        action_type: action.to_string(),
        description: format!("{} for test", action),
        before_state: json!({"timeoutMs": 120000}),
        after_state: json!({"timeoutMs": 240000}),
        auto_applied: true,
    }
}
