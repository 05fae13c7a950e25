mod cycle;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::core::config::SupervisorConfig;
use crate::core::error::{FleetError, FleetResult};
use crate::core::operator::{Diagnosis, DiagnosisKind, DiagnosisOracle, OperatorLoop, RemediationPolicy};
use crate::core::plan::WorkflowGraph;
use crate::core::registry::{DeploymentRecord, NewDeployment, Registry};
use crate::core::supervisor::testing::FakeDaemon;
use crate::core::supervisor::{ProcessStatus, ProcessSupervisor};

/// Oracle with a fixed answer that remembers what it was shown.
pub(super) struct FakeOracle {
    answer: Option<DiagnosisKind>,
    seen: Mutex<Vec<(String, String)>>,
}

impl FakeOracle {
    pub(super) fn answering(kind: DiagnosisKind) -> Self {
        Self {
            answer: Some(kind),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn broken() -> Self {
        Self {
            answer: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiagnosisOracle for FakeOracle {
    async fn diagnose(&self, process: &ProcessStatus, errors: &str) -> FleetResult<Diagnosis> {
        self.seen
            .lock()
            .unwrap()
            .push((process.name.clone(), errors.to_string()));
        match self.answer {
            Some(kind) => Ok(Diagnosis {
                kind,
                detail: "from fake oracle".into(),
            }),
            None => Err(FleetError::Diagnosis("model unavailable".into())),
        }
    }
}

pub(super) struct Fleet {
    pub daemon: FakeDaemon,
    pub registry: Registry,
    pub oracle: Arc<FakeOracle>,
    pub operator: OperatorLoop,
}

pub(super) fn fleet(daemon: FakeDaemon, oracle: FakeOracle) -> Fleet {
    let registry = Registry::in_memory().unwrap();
    let supervisor = Arc::new(ProcessSupervisor::new(
        Arc::new(daemon.clone()),
        &SupervisorConfig::default(),
    ));
    let oracle = Arc::new(oracle);
    let operator = OperatorLoop::new(
        registry.clone(),
        supervisor,
        oracle.clone(),
        RemediationPolicy {
            fallback_model: "gpt-4o-mini".into(),
            backup_credential_env: None,
        },
        50,
    );
    Fleet {
        daemon,
        registry,
        oracle,
        operator,
    }
}

pub(super) async fn deployment(registry: &Registry, slug: &str, config: Value) -> DeploymentRecord {
    registry
        .insert_deployment(&NewDeployment {
            name: format!("{} system", slug),
            slug: slug.to_string(),
            manifest: json!({"name": slug, "slug": slug}),
            graph: WorkflowGraph::default(),
            operational_config: config,
            process_name: format!("fleet-{}", slug),
        })
        .await
        .unwrap()
}

pub(super) fn default_config() -> Value {
    json!({"timeoutMs": 120000, "maxMemoryRestart": "256M"})
}
