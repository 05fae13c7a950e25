//! In-flight runs and their persistence to `execution_logs`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{PhaseEngine, RunResult, RunStatus};
use crate::core::error::{FleetError, FleetResult};
use crate::core::plan::{self, ExecutionPlan, WorkflowGraph};
use crate::core::registry::{DeploymentRecord, ExecutionStatus, ExecutionSummary, Registry};

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub run_id: String,
    pub slug: String,
    #[serde(skip)]
    token: CancellationToken,
}

/// Cancellation tokens of runs that have not finished yet, keyed by run id.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, ActiveRun>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, run_id: &str, slug: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.runs.lock().await.insert(
            run_id.to_string(),
            ActiveRun {
                run_id: run_id.to_string(),
                slug: slug.to_string(),
                token: token.clone(),
            },
        );
        token
    }

    /// Returns false when no such run is in flight.
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.runs.lock().await.get(run_id) {
            Some(run) => {
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn finish(&self, run_id: &str) {
        self.runs.lock().await.remove(run_id);
    }

    pub async fn active(&self) -> Vec<ActiveRun> {
        let mut runs: Vec<ActiveRun> = self.runs.lock().await.values().cloned().collect();
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        runs
    }

    /// Cancel everything, used on shutdown.
    pub async fn cancel_all(&self) {
        for run in self.runs.lock().await.values() {
            run.token.cancel();
        }
    }
}

/// A run whose log row exists and whose token is registered.
pub struct PreparedRun {
    pub run_id: String,
    slug: String,
    graph: WorkflowGraph,
    plan: ExecutionPlan,
    token: CancellationToken,
}

/// Compiles a deployment's stored graph, runs it and records the outcome.
#[derive(Clone)]
pub struct RunService {
    registry: Registry,
    engine: Arc<PhaseEngine>,
    runs: RunRegistry,
}

impl RunService {
    pub fn new(registry: Registry, engine: Arc<PhaseEngine>, runs: RunRegistry) -> Self {
        Self {
            registry,
            engine,
            runs,
        }
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub async fn prepare(&self, slug: &str, triggered_by: &str) -> FleetResult<PreparedRun> {
        let deployment = self.registry.require_deployment(slug).await?;
        let plan = plan::compile(&deployment.graph);
        if plan.is_empty() {
            return Err(FleetError::Validation(format!(
                "deployment `{}` has no agents to run",
                slug
            )));
        }
        let run_id = self
            .registry
            .start_execution(&deployment.id, triggered_by, plan.phases.len() as u32)
            .await?;
        let token = self.runs.register(&run_id, slug).await;
        info!(
            "Run {} prepared for [{}] with {} phases",
            run_id,
            slug,
            plan.phases.len()
        );
        Ok(PreparedRun {
            run_id,
            slug: deployment.slug.clone(),
            graph: effective_graph(&deployment),
            plan,
            token,
        })
    }

    pub async fn execute(&self, prepared: PreparedRun, input: Value) -> FleetResult<RunResult> {
        let PreparedRun {
            run_id,
            slug,
            graph,
            plan,
            token,
        } = prepared;

        let outcome = self.engine.run(&plan, &graph, &input, &token).await;
        self.runs.finish(&run_id).await;

        let (status, summary) = match &outcome {
            Ok(result) => (
                execution_status(result.status),
                ExecutionSummary {
                    phases_completed: result.phases_completed(),
                    phases_failed: result.phases_failed(),
                    tokens: result.totals.tokens(),
                    cost_usd: result.totals.cost_usd,
                    duration_ms: result.totals.duration_ms,
                    error_message: if result.status == RunStatus::Success {
                        None
                    } else {
                        result.first_error()
                    },
                },
            ),
            Err(e) => (
                ExecutionStatus::Failed,
                ExecutionSummary {
                    error_message: Some(e.to_string()),
                    ..Default::default()
                },
            ),
        };
        if let Err(e) = self.registry.finish_execution(&run_id, status, &summary).await {
            warn!("Failed to record outcome of run {}: {}", run_id, e);
        }
        info!(
            "Run {} for [{}] finished: {}",
            run_id,
            slug,
            status.as_str()
        );
        outcome
    }

    /// Prepare and run to completion.
    pub async fn run(
        &self,
        slug: &str,
        input: Value,
        triggered_by: &str,
    ) -> FleetResult<(String, RunResult)> {
        let prepared = self.prepare(slug, triggered_by).await?;
        let run_id = prepared.run_id.clone();
        let result = self.execute(prepared, input).await?;
        Ok((run_id, result))
    }

    /// Prepare in the caller, execute in the background. Returns the run id.
    pub async fn start(&self, slug: &str, input: Value, triggered_by: &str) -> FleetResult<String> {
        let prepared = self.prepare(slug, triggered_by).await?;
        let run_id = prepared.run_id.clone();
        let service = self.clone();
        tokio::spawn(async move {
            let id = prepared.run_id.clone();
            if let Err(e) = service.execute(prepared, input).await {
                error!("Background run {} failed: {}", id, e);
            }
        });
        Ok(run_id)
    }

    pub async fn cancel(&self, run_id: &str) -> FleetResult<()> {
        if self.runs.cancel(run_id).await {
            info!("Cancellation requested for run {}", run_id);
            Ok(())
        } else {
            Err(FleetError::NotFound(format!("active run {}", run_id)))
        }
    }
}

/// The stored graph with the deployment's operational config folded into
/// every agent node:
///
/// - `timeoutMs` is a floor, so a raised operational timeout reaches agents
///   that set their own.
/// - `model` fills in for agents without one.
/// - `fallbackModel` is added while `rateLimitMitigation` is on.
/// - `apiKeyEnv` replaces the agent's credential variable.
pub(super) fn effective_graph(deployment: &DeploymentRecord) -> WorkflowGraph {
    let mut graph = deployment.graph.clone();
    let ops = &deployment.operational_config;
    let timeout = ops.get("timeoutMs").and_then(Value::as_u64);
    let model = ops.get("model").and_then(Value::as_str);
    let fallback = ops
        .get("fallbackModel")
        .and_then(Value::as_str)
        .filter(|_| ops.get("rateLimitMitigation").and_then(Value::as_bool) == Some(true));
    let api_key_env = ops.get("apiKeyEnv").and_then(Value::as_str);

    for node in graph.nodes.iter_mut().filter(|n| n.is_agent()) {
        if !node.config.is_object() {
            node.config = Value::Object(serde_json::Map::new());
        }
        let Value::Object(map) = &mut node.config else {
            continue;
        };
        if let Some(timeout) = timeout {
            let own = map.get("timeoutMs").and_then(Value::as_u64).unwrap_or(0);
            map.insert("timeoutMs".to_string(), Value::from(own.max(timeout)));
        }
        if let Some(model) = model
            && !map.contains_key("model")
        {
            map.insert("model".to_string(), Value::from(model));
        }
        if let Some(fallback) = fallback {
            map.insert("fallbackModel".to_string(), Value::from(fallback));
        }
        if let Some(env) = api_key_env {
            map.insert("apiKeyEnv".to_string(), Value::from(env));
        }
    }
    graph
}

fn execution_status(status: RunStatus) -> ExecutionStatus {
    match status {
        RunStatus::Success => ExecutionStatus::Success,
        RunStatus::Partial => ExecutionStatus::Partial,
        RunStatus::Failed => ExecutionStatus::Failed,
    }
}
