//! Self-healing operator.
//!
//! A cycle lists the fleet's processes, and for every one that is not
//! `online` and belongs to a live deployment: gathers recent error text,
//! asks the diagnosis oracle what went wrong, applies the matching
//! remediation to the operational config, restarts the process and writes a
//! pending audit record. Failures are per process and never end the cycle.

mod approval;
pub mod diagnosis;
pub mod remediation;
mod schedule;

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::core::deploy::restart_options;
use crate::core::error::{FleetError, FleetResult};
use crate::core::registry::{
    DeploymentRecord, DeploymentStatus, NewOperatorAction, OperatorActionRecord, OperatorType,
    Registry,
};
use crate::core::supervisor::{ProcessStatus, ProcessSupervisor};

pub use diagnosis::{Diagnosis, DiagnosisKind, DiagnosisOracle, LlmDiagnosisOracle};
pub use remediation::{Remediation, RemediationPolicy, decide, double_memory, merge_config};
pub use schedule::{SingleFlight, schedule_cycles};

pub const RECENT_EXECUTION_ERRORS: u32 = 5;
pub const MAX_ERROR_WINDOW_CHARS: usize = 4_000;
const LOG_TAIL_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct CycleError {
    pub process: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Processes that were not online.
    pub inspected: usize,
    /// Of those, processes with no live deployment record.
    pub skipped_orphans: usize,
    /// Of those, deployments stopped on purpose.
    pub skipped_stopped: usize,
    pub actions: Vec<OperatorActionRecord>,
    pub errors: Vec<CycleError>,
}

pub struct OperatorLoop {
    registry: Registry,
    supervisor: Arc<ProcessSupervisor>,
    oracle: Arc<dyn DiagnosisOracle>,
    policy: RemediationPolicy,
    error_window_lines: usize,
}

impl OperatorLoop {
    pub fn new(
        registry: Registry,
        supervisor: Arc<ProcessSupervisor>,
        oracle: Arc<dyn DiagnosisOracle>,
        policy: RemediationPolicy,
        error_window_lines: usize,
    ) -> Self {
        Self {
            registry,
            supervisor,
            oracle,
            policy,
            error_window_lines,
        }
    }

    /// One pass over the fleet. Callers must not run two cycles at once.
    pub async fn run_cycle(&self) -> FleetResult<CycleReport> {
        let processes = self.supervisor.list().await?;
        let mut report = CycleReport::default();

        for process in processes.iter().filter(|p| !p.is_online()) {
            report.inspected += 1;
            let deployment = match self.registry.find_by_process_name(&process.name).await {
                Ok(Some(d)) => d,
                Ok(None) => {
                    debug!("Skipping {}: no live deployment owns it", process.name);
                    report.skipped_orphans += 1;
                    continue;
                }
                Err(e) => {
                    report.errors.push(CycleError {
                        process: process.name.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if deployment.status == DeploymentStatus::Stopped {
                debug!("Skipping {}: [{}] was stopped", process.name, deployment.slug);
                report.skipped_stopped += 1;
                continue;
            }
            if let Err(e) = self.heal(process, &deployment, &mut report).await {
                warn!("Operator could not handle {}: {}", process.name, e);
                report.errors.push(CycleError {
                    process: process.name.clone(),
                    message: e.to_string(),
                });
            }
        }

        info!(
            "Operator cycle: {} inspected, {} orphans, {} stopped, {} actions, {} errors",
            report.inspected,
            report.skipped_orphans,
            report.skipped_stopped,
            report.actions.len(),
            report.errors.len()
        );
        Ok(report)
    }

    async fn heal(
        &self,
        process: &ProcessStatus,
        deployment: &DeploymentRecord,
        report: &mut CycleReport,
    ) -> FleetResult<()> {
        let window = self.error_window(process, deployment).await;
        let diagnosis = match self.oracle.diagnose(process, &window).await {
            Ok(d) => d,
            Err(e) => {
                warn!("Diagnosis of {} failed, treating as unknown: {}", process.name, e);
                Diagnosis::unknown(e.to_string())
            }
        };
        info!(
            "[{}] diagnosed as {}: {}",
            deployment.slug,
            diagnosis.kind.as_str(),
            diagnosis.detail
        );

        let remediation = decide(&diagnosis, &deployment.operational_config, &self.policy);
        let config = if remediation.changes_config() {
            let merged = merge_config(&deployment.operational_config, &remediation.after_state);
            self.registry
                .update_operational_config(&deployment.id, &merged)
                .await?;
            info!("[{}] {} applied", deployment.slug, remediation.action_type);
            merged
        } else {
            deployment.operational_config.clone()
        };

        let restart = self
            .supervisor
            .restart_with(&deployment.process_name, &restart_options(&config))
            .await;
        let next = if restart.is_ok() {
            DeploymentStatus::Deployed
        } else {
            DeploymentStatus::Errored
        };
        if let Err(e) = self
            .registry
            .update_deployment_status(&deployment.id, next)
            .await
        {
            warn!("Could not mark [{}] {}: {}", deployment.slug, next.as_str(), e);
        }

        let action = self
            .registry
            .insert_operator_action(&NewOperatorAction {
                deployment_id: deployment.id.clone(),
                operator_type: OperatorType::SelfHealing,
                action_type: remediation.action_type.to_string(),
                description: remediation.description,
                before_state: remediation.before_state,
                after_state: remediation.after_state,
                auto_applied: remediation.auto_applied,
            })
            .await?;
        report.actions.push(action);

        if let Err(e) = restart {
            report.errors.push(CycleError {
                process: process.name.clone(),
                message: e.to_string(),
            });
        }
        Ok(())
    }

    /// Recent failed-run messages followed by the tail of the process error
    /// log, truncated to [`MAX_ERROR_WINDOW_CHARS`].
    async fn error_window(&self, process: &ProcessStatus, deployment: &DeploymentRecord) -> String {
        let mut parts = match self
            .registry
            .recent_execution_errors(&deployment.id, RECENT_EXECUTION_ERRORS)
            .await
        {
            Ok(errors) => errors,
            Err(e) => {
                warn!("Reading execution errors for [{}]: {}", deployment.slug, e);
                Vec::new()
            }
        };
        if let Some(path) = &process.error_log_path {
            match tail_lines(path, self.error_window_lines).await {
                Ok(tail) if !tail.is_empty() => parts.push(tail),
                Ok(_) => {}
                Err(e) => debug!("Reading {}: {}", path.display(), e),
            }
        }
        truncate_chars(&parts.join("\n"), MAX_ERROR_WINDOW_CHARS)
    }

    /// Queue a config change for human approval. Nothing is applied until
    /// the action is approved.
    pub async fn propose_optimization(
        &self,
        slug: &str,
        action_type: &str,
        description: &str,
        patch: &Value,
    ) -> FleetResult<OperatorActionRecord> {
        let Some(keys) = patch.as_object().filter(|m| !m.is_empty()) else {
            return Err(FleetError::Validation(
                "optimization must change at least one operational config key".to_string(),
            ));
        };
        if action_type.trim().is_empty() {
            return Err(FleetError::Validation("action type is required".to_string()));
        }
        let deployment = self.registry.require_deployment(slug).await?;
        let keys: Vec<&str> = keys.keys().map(String::as_str).collect();
        let action = self
            .registry
            .insert_operator_action(&NewOperatorAction {
                deployment_id: deployment.id.clone(),
                operator_type: OperatorType::Optimization,
                action_type: action_type.to_string(),
                description: description.to_string(),
                before_state: remediation::snapshot(&deployment.operational_config, &keys),
                after_state: patch.clone(),
                auto_applied: false,
            })
            .await?;
        info!("Proposed {} for [{}] as {}", action_type, slug, action.id);
        Ok(action)
    }
}

/// Last `lines` lines of a file, reading at most the final 64 KiB.
async fn tail_lines(path: &Path, lines: usize) -> std::io::Result<String> {
    if lines == 0 {
        return Ok(String::new());
    }
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);
    let all: Vec<&str> = text.lines().collect();
    // a partial first line is dropped when we started mid-file
    let from_start = if start > 0 { 1 } else { 0 };
    let skip = all.len().saturating_sub(lines).max(from_start.min(all.len()));
    Ok(all[skip..].join("\n"))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests;
