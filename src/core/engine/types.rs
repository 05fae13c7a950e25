use serde::Serialize;
use serde_json::{Map, Value};

/// What an executor hands back for one agent call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub output: Value,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

impl AgentOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            output: Value::String(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub node_id: String,
    pub label: String,
    pub status: AgentStatus,
    pub output: Value,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl AgentResult {
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Success,
    Partial,
    Failed,
}

impl PhaseStatus {
    pub fn from_results(agents: &[AgentResult]) -> Self {
        let ok = agents.iter().filter(|a| a.is_success()).count();
        if ok == agents.len() {
            PhaseStatus::Success
        } else if ok > 0 {
            PhaseStatus::Partial
        } else {
            PhaseStatus::Failed
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub name: String,
    pub status: PhaseStatus,
    pub agents: Vec<AgentResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_phases(phases: &[PhaseResult], aborted: bool) -> Self {
        if aborted {
            return RunStatus::Failed;
        }
        if phases.iter().all(|p| p.status == PhaseStatus::Success) {
            RunStatus::Success
        } else if phases.iter().all(|p| p.status == PhaseStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub agents_succeeded: u32,
    pub agents_failed: u32,
}

impl RunTotals {
    pub fn tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub phases: Vec<PhaseResult>,
    /// Successful agent outputs keyed by sanitized label.
    pub context: Map<String, Value>,
    pub totals: RunTotals,
    pub aborted: bool,
}

impl RunResult {
    pub fn phases_completed(&self) -> u32 {
        self.phases
            .iter()
            .filter(|p| p.status != PhaseStatus::Failed)
            .count() as u32
    }

    pub fn phases_failed(&self) -> u32 {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Failed)
            .count() as u32
    }

    /// First agent error, for the execution log.
    pub fn first_error(&self) -> Option<String> {
        if self.aborted {
            return Some("run cancelled".to_string());
        }
        self.phases
            .iter()
            .flat_map(|p| p.agents.iter())
            .find_map(|a| a.error.as_ref().map(|e| format!("{}: {}", a.label, e)))
    }
}
