use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::plan::WorkflowGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deployed,
    Stopped,
    Errored,
    Archived,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Errored => "errored",
            DeploymentStatus::Archived => "archived",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "deployed" => Some(DeploymentStatus::Deployed),
            "stopped" => Some(DeploymentStatus::Stopped),
            "errored" => Some(DeploymentStatus::Errored),
            "archived" => Some(DeploymentStatus::Archived),
            _ => None,
        }
    }

    /// `archived` is terminal; the live states may cycle freely.
    pub fn can_transition(self, next: DeploymentStatus) -> bool {
        match (self, next) {
            (DeploymentStatus::Archived, _) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub manifest: Value,
    pub graph: WorkflowGraph,
    /// JSON object: `timeoutMs`, `maxMemoryRestart`, `fallbackModel`, ...
    pub operational_config: Value,
    pub trigger_type: Option<String>,
    pub trigger_config: Value,
    pub path_config: Value,
    pub process_name: String,
    pub status: DeploymentStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub name: String,
    pub slug: String,
    pub manifest: Value,
    pub graph: WorkflowGraph,
    pub operational_config: Value,
    pub process_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "partial" => Some(ExecutionStatus::Partial),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLogRecord {
    pub id: String,
    pub deployment_id: String,
    pub triggered_by: String,
    pub status: ExecutionStatus,
    pub phases_total: u32,
    pub phases_completed: u32,
    pub phases_failed: u32,
    pub tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Final figures written when a run ends.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub phases_completed: u32,
    pub phases_failed: u32,
    pub tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
    SelfHealing,
    Optimization,
}

impl OperatorType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatorType::SelfHealing => "self_healing",
            OperatorType::Optimization => "optimization",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "self_healing" => Some(OperatorType::SelfHealing),
            "optimization" => Some(OperatorType::Optimization),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorActionRecord {
    pub id: String,
    pub deployment_id: String,
    pub operator_type: OperatorType,
    pub action_type: String,
    pub description: String,
    pub before_state: Value,
    pub after_state: Value,
    pub auto_applied: bool,
    /// `None` while pending.
    pub approved: Option<bool>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOperatorAction {
    pub deployment_id: String,
    pub operator_type: OperatorType,
    pub action_type: String,
    pub description: String,
    pub before_state: Value,
    pub after_state: Value,
    pub auto_applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionFilter {
    #[serde(default)]
    pub operator_type: Option<OperatorType>,
    #[serde(default)]
    pub approval: Option<ApprovalState>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ActionFilter {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    pub fn pending() -> Self {
        Self {
            approval: Some(ApprovalState::Pending),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}
