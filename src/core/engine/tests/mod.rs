
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::core::engine::{AgentExecutor, AgentOutput, PhaseEngine};
use crate::core::plan::{GraphNode, Phase};

#[derive(Clone)]
pub(super) enum Behaviour {
    Reply(Value),
    Fail(&'static str),
    Delay(Duration, Value),
    Hang,
    /// Cancel the run token, then reply.
    CancelRun(Value),
}

#[derive(Default)]
pub(super) struct ScriptedExecutor {
    behaviours: HashMap<String, Behaviour>,
    started: Mutex<Vec<String>>,
    seen_context: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedExecutor {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn on(mut self, node_id: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(node_id.to_string(), behaviour);
        self
    }

    pub(super) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Context keys visible to `node_id` when it started.
    pub(super) fn context_seen_by(&self, node_id: &str) -> Vec<String> {
        self.seen_context
            .lock()
            .unwrap()
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        node: &GraphNode,
        _input: &Value,
        context: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> anyhow::Result<AgentOutput> {
        self.started.lock().unwrap().push(node.id.clone());
        let mut keys: Vec<String> = context.keys().cloned().collect();
        keys.sort();
        self.seen_context
            .lock()
            .unwrap()
            .insert(node.id.clone(), keys);

        let behaviour = self
            .behaviours
            .get(&node.id)
            .cloned()
            .unwrap_or_else(|| Behaviour::Reply(json!(format!("{} done", node.id))));
        let output = match behaviour {
            Behaviour::Reply(v) => v,
            Behaviour::Fail(msg) => return Err(anyhow!(msg)),
            Behaviour::Delay(d, v) => {
                tokio::time::sleep(d).await;
                v
            }
            Behaviour::Hang => std::future::pending().await,
            Behaviour::CancelRun(v) => {
                cancel.cancel();
                v
            }
        };
        Ok(AgentOutput {
            output,
            tokens_in: 10,
            tokens_out: 5,
            cost_usd: 0.001,
        })
    }
}

pub(super) fn engine(exec: &Arc<ScriptedExecutor>) -> PhaseEngine {
    PhaseEngine::new(exec.clone())
}

pub(super) fn agent(id: &str, label: &str, config: Value) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        kind: "agent".to_string(),
        label: Some(label.to_string()),
        config,
        parent_id: None,
    }
}

pub(super) fn phase(name: &str, members: &[&str], parallel: bool) -> Phase {
    Phase {
        name: name.to_string(),
        members: members.iter().map(|m| m.to_string()).collect(),
        parallel,
    }
}
