//! Everything a running fleet needs, built once and shared by reference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::core::config::FleetConfig;
use crate::core::deploy::DeploymentOrchestrator;
use crate::core::engine::{AgentExecutor, LlmExecutor, PhaseEngine, RunRegistry, RunService};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::{LlmProvider, OpenAiCompatProvider};
use crate::core::operator::{
    DiagnosisOracle, LlmDiagnosisOracle, OperatorLoop, RemediationPolicy, SingleFlight,
};
use crate::core::registry::Registry;
use crate::core::supervisor::{Pm2Daemon, ProcessDaemon, ProcessSupervisor};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<FleetConfig>,
    pub registry: Registry,
    pub supervisor: Arc<ProcessSupervisor>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub runs: RunService,
    pub operator: SingleFlight,
}

/// The collaborators that talk to the outside world.
pub struct Adapters {
    pub daemon: Arc<dyn ProcessDaemon>,
    pub executor: Arc<dyn AgentExecutor>,
    pub oracle: Arc<dyn DiagnosisOracle>,
}

impl Adapters {
    /// PM2 for processes, the configured chat-completions endpoint for
    /// agents and diagnosis.
    pub fn live(config: &FleetConfig) -> Self {
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::from_config(&config.llm));
        Self {
            daemon: Arc::new(Pm2Daemon::new(config.supervisor.pm2_bin.clone())),
            executor: Arc::new(LlmExecutor::new(provider.clone(), config.llm.model.clone())),
            oracle: Arc::new(LlmDiagnosisOracle::new(provider, config.llm.model.clone())),
        }
    }
}

impl AppContext {
    /// Open the registry under `data_dir` and wire the live adapters.
    pub async fn open(config: FleetConfig, data_dir: &Path) -> Result<Self> {
        let registry = Registry::open(data_dir).await?;
        let adapters = Adapters::live(&config);
        let deploy_root = config.deploy_root(data_dir);
        Ok(Self::assemble(config, registry, adapters, deploy_root))
    }

    pub fn assemble(
        config: FleetConfig,
        registry: Registry,
        adapters: Adapters,
        deploy_root: PathBuf,
    ) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new(adapters.daemon, &config.supervisor));
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            registry.clone(),
            supervisor.clone(),
            deploy_root,
        ));
        let runs = RunService::new(
            registry.clone(),
            Arc::new(PhaseEngine::new(adapters.executor)),
            RunRegistry::new(),
        );
        let operator = SingleFlight::new(Arc::new(OperatorLoop::new(
            registry.clone(),
            supervisor.clone(),
            adapters.oracle,
            RemediationPolicy::from_config(&config.operator),
            config.operator.error_window_lines,
        )));
        Self {
            config: Arc::new(config),
            registry,
            supervisor,
            orchestrator,
            runs,
            operator,
        }
    }
}

/// Cancels in-flight runs when the server shuts down.
pub struct RunReaper {
    runs: RunRegistry,
}

impl RunReaper {
    pub fn new(runs: RunRegistry) -> Self {
        Self { runs }
    }
}

#[async_trait]
impl LifecycleComponent for RunReaper {
    async fn on_shutdown(&mut self) -> Result<()> {
        let active = self.runs.active().await;
        if !active.is_empty() {
            info!("Cancelling {} in-flight runs", active.len());
        }
        self.runs.cancel_all().await;
        Ok(())
    }
}
