//! Deployment pipeline.
//!
//! A deploy runs five steps. When a step fails, every step that already
//! completed is compensated in reverse order, best effort, and the original
//! error is surfaced (wrapped with the step tag unless it is a domain error).

mod artifacts;
pub mod bundle;
pub mod triggers;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::core::engine::DEFAULT_AGENT_TIMEOUT_MS;
use crate::core::error::{FleetError, FleetResult};
use crate::core::registry::{DeploymentRecord, DeploymentStatus, NewDeployment, Registry};
use crate::core::supervisor::{ProcessSpec, ProcessStatus, ProcessSupervisor, RestartOptions};

pub use artifacts::DeployPaths;
pub use bundle::{Bundle, TriggerPattern};

pub const STEP_AGENT_CONFIGS: &str = "agent-configs";
pub const STEP_INTEGRATION_CONFIGS: &str = "integration-configs";
pub const STEP_TRIGGER_CONFIG: &str = "trigger-config";
pub const STEP_REGISTRY: &str = "registry";
pub const STEP_PM2_START: &str = "pm2-start";

pub const DEFAULT_MAX_MEMORY_RESTART: &str = "256M";

/// Compensation owed for a completed (or partially completed) step.
enum Completed {
    AgentConfigs,
    IntegrationConfigs,
    TriggerConfig,
    Registered { id: String },
    ProcessSubmitted { name: String },
}

/// Operational config a fresh deployment starts with.
pub fn initial_operational_config(bundle: &Bundle) -> Value {
    let timeout_ms = bundle
        .agents
        .iter()
        .filter_map(|a| a.timeout_ms)
        .max()
        .unwrap_or(DEFAULT_AGENT_TIMEOUT_MS);
    let mut config = Map::new();
    config.insert("timeoutMs".to_string(), json!(timeout_ms));
    config.insert(
        "maxMemoryRestart".to_string(),
        json!(
            bundle
                .process
                .max_memory_restart
                .as_deref()
                .unwrap_or(DEFAULT_MAX_MEMORY_RESTART)
        ),
    );
    if let Some(model) = bundle.agents.iter().find_map(|a| a.model.as_deref()) {
        config.insert("model".to_string(), json!(model));
    }
    Value::Object(config)
}

/// Slugs with a deploy in progress. A claim is released when its guard drops,
/// so an abandoned deploy future frees the slug too.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

struct SlugClaim {
    in_flight: InFlight,
    slug: String,
}

impl InFlight {
    fn claim(&self, slug: &str) -> Option<SlugClaim> {
        let mut slugs = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !slugs.insert(slug.to_string()) {
            return None;
        }
        Some(SlugClaim {
            in_flight: self.clone(),
            slug: slug.to_string(),
        })
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

impl Drop for SlugClaim {
    fn drop(&mut self) {
        self.in_flight
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.slug);
    }
}

/// Process settings from the operational config that a restart re-applies.
pub fn restart_options(config: &Value) -> RestartOptions {
    RestartOptions {
        max_memory_restart: config
            .get("maxMemoryRestart")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

pub struct DeploymentOrchestrator {
    registry: Registry,
    supervisor: Arc<ProcessSupervisor>,
    root: PathBuf,
    in_flight: InFlight,
}

impl DeploymentOrchestrator {
    pub fn new(registry: Registry, supervisor: Arc<ProcessSupervisor>, root: PathBuf) -> Self {
        Self {
            registry,
            supervisor,
            root,
            in_flight: InFlight::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn deploy(&self, bundle: &Bundle) -> FleetResult<DeploymentRecord> {
        bundle.validate()?;
        let slug = bundle.slug();
        // Held until this deploy ends so a concurrent one never shares its files.
        let Some(_claim) = self.in_flight.claim(slug) else {
            return Err(FleetError::Conflict(format!(
                "deployment `{}` is already in progress",
                slug
            )));
        };
        if self.registry.get_deployment_by_slug(slug).await?.is_some() {
            return Err(FleetError::Conflict(format!(
                "deployment `{}` already exists",
                slug
            )));
        }

        let paths = DeployPaths::for_slug(&self.root, slug);
        let mut done = Vec::new();
        match self.run_steps(bundle, &paths, &mut done).await {
            Ok(record) => {
                info!("Deployed [{}] as process {}", slug, record.process_name);
                Ok(record)
            }
            Err(err) => {
                warn!("Deployment of [{}] failed: {}. Rolling back.", slug, err);
                self.rollback(&paths, done).await;
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        bundle: &Bundle,
        paths: &DeployPaths,
        done: &mut Vec<Completed>,
    ) -> FleetResult<DeploymentRecord> {
        let slug = bundle.slug();

        // Pushed before the write so a half-written directory is cleaned up too.
        done.push(Completed::AgentConfigs);
        artifacts::write_agent_configs(paths, bundle)
            .await
            .map_err(|e| FleetError::at_step(STEP_AGENT_CONFIGS, e))?;
        info!("[{}] {} written", slug, STEP_AGENT_CONFIGS);

        done.push(Completed::IntegrationConfigs);
        artifacts::write_integration_configs(paths, bundle)
            .await
            .map_err(|e| FleetError::at_step(STEP_INTEGRATION_CONFIGS, e))?;
        info!("[{}] {} written", slug, STEP_INTEGRATION_CONFIGS);

        let trigger = triggers::trigger_config(&bundle.manifest);
        done.push(Completed::TriggerConfig);
        artifacts::write_trigger_config(paths, &trigger)
            .await
            .map_err(|e| FleetError::at_step(STEP_TRIGGER_CONFIG, e))?;
        info!("[{}] {} written", slug, STEP_TRIGGER_CONFIG);

        let record = self
            .register(bundle, paths, &trigger, done)
            .await
            .map_err(|e| FleetError::at_step(STEP_REGISTRY, e))?;
        info!("[{}] registered as {}", slug, record.id);

        self.start_process(bundle, paths, &record, done)
            .await
            .map_err(|e| FleetError::at_step(STEP_PM2_START, e))?;

        // The process is online; a failed re-read must not roll it back.
        match self.registry.get_deployment(&record.id).await {
            Ok(Some(fresh)) => Ok(fresh),
            Ok(None) => {
                warn!("[{}] record {} vanished after start", slug, record.id);
                Ok(record)
            }
            Err(e) => {
                warn!("[{}] re-reading record {}: {}", slug, record.id, e);
                Ok(record)
            }
        }
    }

    async fn register(
        &self,
        bundle: &Bundle,
        paths: &DeployPaths,
        trigger: &Value,
        done: &mut Vec<Completed>,
    ) -> FleetResult<DeploymentRecord> {
        let new = NewDeployment {
            name: bundle.manifest.name.clone(),
            slug: bundle.slug().to_string(),
            manifest: serde_json::to_value(&bundle.manifest)?,
            graph: bundle.workflow.clone(),
            operational_config: initial_operational_config(bundle),
            process_name: self.supervisor.process_name(bundle.slug()),
        };
        let record = self.registry.insert_deployment(&new).await?;
        done.push(Completed::Registered {
            id: record.id.clone(),
        });
        let path_config = paths.to_json();
        let trigger_type = bundle.manifest.trigger_pattern.as_str();
        self.registry
            .set_deployment_trigger(&record.id, trigger_type, trigger, &path_config)
            .await?;
        Ok(DeploymentRecord {
            trigger_type: Some(trigger_type.to_string()),
            trigger_config: trigger.clone(),
            path_config,
            ..record
        })
    }

    async fn start_process(
        &self,
        bundle: &Bundle,
        paths: &DeployPaths,
        record: &DeploymentRecord,
        done: &mut Vec<Completed>,
    ) -> FleetResult<ProcessStatus> {
        let process = &bundle.process;
        let Some(script) = process.script.clone().filter(|_| process.has_script()) else {
            return Err(FleetError::supervisor(
                &record.process_name,
                "process config has no script",
            ));
        };

        let spec = ProcessSpec {
            name: record.process_name.clone(),
            script,
            args: process.args.clone(),
            interpreter: process.interpreter.clone(),
            cwd: Some(paths.agents_dir.clone()),
            env: process.env.clone(),
            max_memory_restart: record
                .operational_config
                .get("maxMemoryRestart")
                .and_then(Value::as_str)
                .map(str::to_string),
            instances: process.instances,
            autorestart: process.autorestart,
        };

        done.push(Completed::ProcessSubmitted {
            name: spec.name.clone(),
        });
        self.supervisor.start(&spec).await
    }

    async fn rollback(&self, paths: &DeployPaths, done: Vec<Completed>) {
        for step in done.into_iter().rev() {
            let (what, result) = match step {
                Completed::ProcessSubmitted { name } => {
                    ("process", self.supervisor.delete(&name).await)
                }
                Completed::Registered { id } => (
                    "registry record",
                    self.registry
                        .update_deployment_status(&id, DeploymentStatus::Errored)
                        .await,
                ),
                Completed::TriggerConfig => (
                    "trigger config",
                    artifacts::remove_file(&paths.trigger_file).await,
                ),
                Completed::IntegrationConfigs => (
                    "integration configs",
                    artifacts::remove_dir(&paths.integrations_dir).await,
                ),
                Completed::AgentConfigs => (
                    "agent configs",
                    artifacts::remove_dir(&paths.agents_dir).await,
                ),
            };
            if let Err(e) = result {
                warn!("Rollback of {} failed: {}", what, e);
            }
        }
    }

    /// Archive a deployment: stop and delete its process, remove its files,
    /// then mark the record `archived`. Only the final status write can fail.
    pub async fn undeploy(&self, slug: &str) -> FleetResult<DeploymentRecord> {
        let mut record = self.registry.require_deployment(slug).await?;

        if let Err(e) = self.supervisor.stop(&record.process_name).await {
            warn!("Stopping {} during undeploy: {}", record.process_name, e);
        }
        if let Err(e) = self.supervisor.delete(&record.process_name).await {
            warn!("Deleting {} during undeploy: {}", record.process_name, e);
        }

        let paths = DeployPaths::for_slug(&self.root, slug);
        for result in [
            artifacts::remove_dir(&paths.agents_dir).await,
            artifacts::remove_dir(&paths.integrations_dir).await,
            artifacts::remove_file(&paths.trigger_file).await,
        ] {
            if let Err(e) = result {
                warn!("Removing artifacts of [{}]: {}", slug, e);
            }
        }

        self.registry
            .update_deployment_status(&record.id, DeploymentStatus::Archived)
            .await?;
        record.status = DeploymentStatus::Archived;
        info!("Archived deployment [{}]", slug);
        Ok(record)
    }

    pub async fn stop(&self, slug: &str) -> FleetResult<DeploymentRecord> {
        let record = self.registry.require_deployment(slug).await?;
        self.supervisor.stop(&record.process_name).await?;
        self.registry
            .update_deployment_status(&record.id, DeploymentStatus::Stopped)
            .await?;
        self.registry.require_deployment(slug).await
    }

    /// Restart and wait for online. The record follows the outcome.
    pub async fn restart(&self, slug: &str) -> FleetResult<ProcessStatus> {
        let record = self.registry.require_deployment(slug).await?;
        match self
            .supervisor
            .restart_with(&record.process_name, &restart_options(&record.operational_config))
            .await
        {
            Ok(status) => {
                self.registry
                    .update_deployment_status(&record.id, DeploymentStatus::Deployed)
                    .await?;
                Ok(status)
            }
            Err(e) => {
                if let Err(mark) = self
                    .registry
                    .update_deployment_status(&record.id, DeploymentStatus::Errored)
                    .await
                {
                    warn!("Could not mark [{}] errored: {}", slug, mark);
                }
                Err(e)
            }
        }
    }

    /// Record plus whatever the daemon currently reports for its process.
    pub async fn status(&self, slug: &str) -> FleetResult<(DeploymentRecord, Option<ProcessStatus>)> {
        let record = self.registry.require_deployment(slug).await?;
        let process = match self.supervisor.describe(&record.process_name).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Describing {}: {}", record.process_name, e);
                None
            }
        };
        Ok((record, process))
    }
}

#[cfg(test)]
mod tests;
