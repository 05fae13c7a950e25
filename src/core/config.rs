use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_FILE_NAME: &str = "agentfleet.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub operator: OperatorConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root under which deployments write `agents/` and `config/`.
    /// Defaults to `<data_dir>/deployments`.
    #[serde(default)]
    pub deploy_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_process_prefix")]
    pub process_prefix: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    #[serde(default = "default_pm2_bin")]
    pub pm2_bin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Six-field cron expression (seconds first).
    #[serde(default = "default_operator_schedule")]
    pub schedule: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    /// Environment variable holding a backup provider credential.
    #[serde(default)]
    pub backup_credential_env: Option<String>,
    #[serde(default = "default_error_window_lines")]
    pub error_window_lines: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    17990
}
fn default_process_prefix() -> String {
    "fleet".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_start_timeout_ms() -> u64 {
    15_000
}
fn default_pm2_bin() -> String {
    "pm2".to_string()
}
fn default_true() -> bool {
    true
}
fn default_operator_schedule() -> String {
    "0 * * * * *".to_string()
}
fn default_fallback_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_error_window_lines() -> usize {
    50
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            process_prefix: default_process_prefix(),
            poll_interval_ms: default_poll_interval_ms(),
            start_timeout_ms: default_start_timeout_ms(),
            pm2_bin: default_pm2_bin(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_operator_schedule(),
            fallback_model: default_fallback_model(),
            backup_credential_env: None,
            error_window_lines: default_error_window_lines(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
            model: default_llm_model(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            supervisor: SupervisorConfig::default(),
            operator: OperatorConfig::default(),
            llm: LlmConfig::default(),
            log_level: default_log_level(),
            deploy_root: None,
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

impl FleetConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE_NAME);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn deploy_root(&self, data_dir: &Path) -> PathBuf {
        self.deploy_root
            .clone()
            .unwrap_or_else(|| data_dir.join("deployments"))
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}
