use std::collections::HashSet;

use super::types::{EdgeType, ExecutionPlan, GraphNode, Phase, WorkflowGraph};

pub const INTAKE_PHASE: &str = "Intake";
pub const QUALITY_GATE_PHASE: &str = "Quality Gate";
pub const FLAT_PHASE: &str = "Execution";

/// Compile a workflow graph into ordered phases.
///
/// Delegation edges split agents into orchestrators (never delegated to),
/// leads (delegate and are delegated to) and specialists (only delegated
/// to). Each lead gets its own phase together with the specialists that share
/// its parent group. Control-edge targets run last as the quality gate.
///
/// Leads are visited in first-seen order along lead-to-lead data edges, which
/// follows the edge list rather than a dependency sort. A graph without agents
/// compiles to an empty plan.
pub fn compile(graph: &WorkflowGraph) -> ExecutionPlan {
    let agents: Vec<&GraphNode> = graph.agents().collect();
    if agents.is_empty() {
        return ExecutionPlan::default();
    }
    let agent_ids: HashSet<&str> = agents.iter().map(|n| n.id.as_str()).collect();

    let mut delegators: HashSet<&str> = HashSet::new();
    let mut delegates: HashSet<&str> = HashSet::new();
    let mut audited: HashSet<&str> = HashSet::new();
    for edge in &graph.edges {
        match edge.kind {
            EdgeType::Delegation => {
                if agent_ids.contains(edge.source.as_str()) {
                    delegators.insert(edge.source.as_str());
                }
                if agent_ids.contains(edge.target.as_str()) {
                    delegates.insert(edge.target.as_str());
                }
            }
            EdgeType::Control => {
                if agent_ids.contains(edge.target.as_str()) {
                    audited.insert(edge.target.as_str());
                }
            }
            _ => {}
        }
    }

    if delegators.is_empty() && delegates.is_empty() {
        return ExecutionPlan {
            phases: vec![Phase {
                name: FLAT_PHASE.to_string(),
                members: agents.iter().map(|n| n.id.clone()).collect(),
                parallel: false,
            }],
        };
    }

    let orchestrators: Vec<&GraphNode> = agents
        .iter()
        .copied()
        .filter(|n| delegators.contains(n.id.as_str()) && !delegates.contains(n.id.as_str()))
        .collect();
    let leads: Vec<&GraphNode> = agents
        .iter()
        .copied()
        .filter(|n| delegators.contains(n.id.as_str()) && delegates.contains(n.id.as_str()))
        .collect();
    let specialists: Vec<&GraphNode> = agents
        .iter()
        .copied()
        .filter(|n| delegates.contains(n.id.as_str()) && !delegators.contains(n.id.as_str()))
        .collect();
    let auditors: Vec<&GraphNode> = agents
        .iter()
        .copied()
        .filter(|n| audited.contains(n.id.as_str()))
        .collect();

    let mut phases = Vec::new();

    if !orchestrators.is_empty() {
        phases.push(Phase {
            name: INTAKE_PHASE.to_string(),
            members: orchestrators.iter().map(|n| n.id.clone()).collect(),
            parallel: false,
        });
    }

    for lead in lead_visiting_order(graph, &leads) {
        let team: Vec<&GraphNode> = specialists
            .iter()
            .copied()
            .filter(|s| s.parent_id == lead.parent_id)
            .collect();
        let mut members = vec![lead.id.clone()];
        members.extend(team.iter().map(|s| s.id.clone()));
        phases.push(Phase {
            name: format!("{} Phase", lead.display_label()),
            members,
            parallel: team.len() > 1,
        });
    }

    if !auditors.is_empty() {
        phases.push(Phase {
            name: QUALITY_GATE_PHASE.to_string(),
            members: auditors.iter().map(|n| n.id.clone()).collect(),
            parallel: false,
        });
    }

    ExecutionPlan { phases }
}

/// First-seen order over lead-to-lead data edges, then untouched leads in
/// graph order.
fn lead_visiting_order<'g>(graph: &WorkflowGraph, leads: &[&'g GraphNode]) -> Vec<&'g GraphNode> {
    let lead_ids: HashSet<&str> = leads.iter().map(|n| n.id.as_str()).collect();
    let mut seen: Vec<&str> = Vec::new();

    for edge in &graph.edges {
        if edge.kind != EdgeType::Data {
            continue;
        }
        let (src, dst) = (edge.source.as_str(), edge.target.as_str());
        if !lead_ids.contains(src) || !lead_ids.contains(dst) {
            continue;
        }
        for id in [src, dst] {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
    }

    let mut ordered: Vec<&'g GraphNode> = seen
        .iter()
        .filter_map(|id| leads.iter().copied().find(|n| n.id == *id))
        .collect();
    for lead in leads {
        if !seen.contains(&lead.id.as_str()) {
            ordered.push(lead);
        }
    }
    ordered
}
