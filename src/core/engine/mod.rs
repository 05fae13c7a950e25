//! Phase execution engine.
//!
//! Runs an [`ExecutionPlan`] phase by phase. Sequential phases run one agent
//! at a time and feed each successful output into the shared context before
//! the next agent starts. Parallel phases spawn every member on a `JoinSet`
//! against a snapshot of the context and merge successful outputs only after
//! all of them have resolved.

mod llm_executor;
pub mod runs;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::error::{FleetError, FleetResult};
use crate::core::plan::{ExecutionPlan, GraphNode, Phase, WorkflowGraph};

pub use llm_executor::LlmExecutor;
pub use runs::{RunRegistry, RunService};
pub use types::{
    AgentOutput, AgentResult, AgentStatus, PhaseResult, PhaseStatus, RunResult, RunStatus,
    RunTotals,
};

pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 120_000;

/// Runs a single agent node.
///
/// The token is the run's cancellation token. Implementations that want
/// in-flight calls to stop early must watch it themselves; the engine only
/// checks it between phases.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &GraphNode,
        input: &Value,
        context: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> anyhow::Result<AgentOutput>;
}

/// Per-agent timeout from `config.timeoutMs`.
pub fn agent_timeout(node: &GraphNode) -> Duration {
    let ms = node
        .config
        .get("timeoutMs")
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_AGENT_TIMEOUT_MS);
    Duration::from_millis(ms)
}

/// Lowercase alphanumerics joined by single underscores; falls back to the
/// node id when nothing usable is left.
pub fn context_key(node: &GraphNode) -> String {
    let mut key = String::new();
    for ch in node.display_label().chars() {
        if ch.is_ascii_alphanumeric() {
            key.push(ch.to_ascii_lowercase());
        } else if !key.is_empty() && !key.ends_with('_') {
            key.push('_');
        }
    }
    let key = key.trim_end_matches('_').to_string();
    if key.is_empty() { node.id.clone() } else { key }
}

pub struct PhaseEngine {
    executor: Arc<dyn AgentExecutor>,
}

impl PhaseEngine {
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self { executor }
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        graph: &WorkflowGraph,
        input: &Value,
        cancel: &CancellationToken,
    ) -> FleetResult<RunResult> {
        if plan.is_empty() {
            return Err(FleetError::Validation(
                "execution plan has no phases".to_string(),
            ));
        }

        let began = Instant::now();
        let mut context = Map::new();
        let mut phases = Vec::with_capacity(plan.phases.len());
        let mut aborted = false;

        for phase in &plan.phases {
            if cancel.is_cancelled() {
                info!("Run cancelled before phase [{}]", phase.name);
                aborted = true;
                break;
            }

            let agents = if phase.parallel {
                self.run_parallel(phase, graph, input, &mut context, cancel)
                    .await
            } else {
                self.run_sequential(phase, graph, input, &mut context, cancel)
                    .await
            };
            let status = PhaseStatus::from_results(&agents);
            info!(
                "Phase [{}] finished: {:?} ({} agents)",
                phase.name,
                status,
                agents.len()
            );
            phases.push(PhaseResult {
                name: phase.name.clone(),
                status,
                agents,
            });
        }

        let mut totals = RunTotals::default();
        for agent in phases.iter().flat_map(|p| p.agents.iter()) {
            totals.tokens_in += agent.tokens_in;
            totals.tokens_out += agent.tokens_out;
            totals.cost_usd += agent.cost_usd;
            if agent.is_success() {
                totals.agents_succeeded += 1;
            } else {
                totals.agents_failed += 1;
            }
        }
        totals.duration_ms = began.elapsed().as_millis() as u64;

        Ok(RunResult {
            status: RunStatus::from_phases(&phases, aborted),
            phases,
            context,
            totals,
            aborted,
        })
    }

    async fn run_sequential(
        &self,
        phase: &Phase,
        graph: &WorkflowGraph,
        input: &Value,
        context: &mut Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Vec<AgentResult> {
        let mut results = Vec::with_capacity(phase.members.len());
        for member in &phase.members {
            let Some(node) = graph.node(member) else {
                results.push(missing_node(member));
                continue;
            };
            let result =
                run_agent(self.executor.as_ref(), node, input, context, cancel.clone()).await;
            if result.is_success() {
                context.insert(context_key(node), result.output.clone());
            }
            results.push(result);
        }
        results
    }

    async fn run_parallel(
        &self,
        phase: &Phase,
        graph: &WorkflowGraph,
        input: &Value,
        context: &mut Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Vec<AgentResult> {
        let snapshot = Arc::new(context.clone());
        let input = Arc::new(input.clone());
        let mut slots: Vec<Option<AgentResult>> = vec![None; phase.members.len()];
        let mut keys: Vec<Option<String>> = vec![None; phase.members.len()];

        let mut set = JoinSet::new();
        for (idx, member) in phase.members.iter().enumerate() {
            let Some(node) = graph.node(member).cloned() else {
                slots[idx] = Some(missing_node(member));
                continue;
            };
            keys[idx] = Some(context_key(&node));
            let executor = self.executor.clone();
            let snapshot = snapshot.clone();
            let input = input.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = run_agent(executor.as_ref(), &node, &input, &snapshot, cancel).await;
                (idx, result)
            });
        }

        while let Some(res) = set.join_next().await {
            match res {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!("Agent task in phase [{}] did not complete: {}", phase.name, e),
            }
        }

        // Merge only once every member has resolved, in member order.
        let mut results = Vec::with_capacity(slots.len());
        for (idx, slot) in slots.into_iter().enumerate() {
            let result = slot.unwrap_or_else(|| AgentResult {
                node_id: phase.members[idx].clone(),
                label: phase.members[idx].clone(),
                status: AgentStatus::Error,
                output: Value::Null,
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: 0.0,
                duration_ms: 0,
                error: Some("agent task aborted".to_string()),
            });
            if result.is_success()
                && let Some(key) = keys[idx].take()
            {
                context.insert(key, result.output.clone());
            }
            results.push(result);
        }
        results
    }
}

async fn run_agent(
    executor: &dyn AgentExecutor,
    node: &GraphNode,
    input: &Value,
    context: &Map<String, Value>,
    cancel: CancellationToken,
) -> AgentResult {
    let limit = agent_timeout(node);
    let began = Instant::now();
    let outcome = tokio::time::timeout(limit, executor.execute(node, input, context, cancel)).await;
    let duration_ms = began.elapsed().as_millis() as u64;

    let mut result = AgentResult {
        node_id: node.id.clone(),
        label: node.display_label().to_string(),
        status: AgentStatus::Error,
        output: Value::Null,
        tokens_in: 0,
        tokens_out: 0,
        cost_usd: 0.0,
        duration_ms,
        error: None,
    };
    match outcome {
        Ok(Ok(out)) => {
            result.status = AgentStatus::Success;
            result.output = out.output;
            result.tokens_in = out.tokens_in;
            result.tokens_out = out.tokens_out;
            result.cost_usd = out.cost_usd;
        }
        Ok(Err(e)) => {
            warn!("Agent [{}] failed: {}", result.label, e);
            result.error = Some(e.to_string());
        }
        Err(_) => {
            warn!(
                "Agent [{}] timed out after {}ms",
                result.label,
                limit.as_millis()
            );
            result.status = AgentStatus::Timeout;
            result.error = Some(format!("timed out after {}ms", limit.as_millis()));
        }
    }
    result
}

fn missing_node(id: &str) -> AgentResult {
    AgentResult {
        node_id: id.to_string(),
        label: id.to_string(),
        status: AgentStatus::Error,
        output: Value::Null,
        tokens_in: 0,
        tokens_out: 0,
        cost_usd: 0.0,
        duration_ms: 0,
        error: Some("node not found in workflow graph".to_string()),
    }
}

#[cfg(test)]
mod tests;
