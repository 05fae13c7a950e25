use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Launching,
    Online,
    Stopped,
    Errored,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Launching => "launching",
            ProcessState::Online => "online",
            ProcessState::Stopped => "stopped",
            ProcessState::Errored => "errored",
        }
    }

    /// Map a PM2 `pm2_env.status` value onto the four states we track.
    pub fn from_pm2(value: &str) -> Self {
        match value {
            "online" => ProcessState::Online,
            "launching" | "waiting restart" | "one-launch-status" => ProcessState::Launching,
            "errored" => ProcessState::Errored,
            _ => ProcessState::Stopped,
        }
    }
}

/// Supervisor-observed status of one managed process. Never persisted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub pid: Option<u32>,
    pub status: ProcessState,
    pub cpu: f64,
    pub memory: u64,
    pub uptime_ms: u64,
    pub restarts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_log_path: Option<PathBuf>,
}

impl ProcessStatus {
    pub fn new(name: impl Into<String>, status: ProcessState) -> Self {
        Self {
            name: name.into(),
            pid: None,
            status,
            cpu: 0.0,
            memory: 0,
            uptime_ms: 0,
            restarts: 0,
            error_log_path: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ProcessState::Online
    }
}

/// Everything the daemon needs to launch a process.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    pub name: String,
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub max_memory_restart: Option<String>,
    #[serde(default)]
    pub instances: Option<u32>,
    #[serde(default)]
    pub autorestart: Option<bool>,
}

/// Settings re-applied to an existing process when it is restarted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestartOptions {
    pub max_memory_restart: Option<String>,
}
