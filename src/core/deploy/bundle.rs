use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{FleetError, FleetResult};
use crate::core::plan::WorkflowGraph;

static SLUG_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").ok());
static PATH_SAFE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").ok());

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_RE.as_ref().is_some_and(|re| re.is_match(slug))
}

/// Usable as a single path component: no separators, no `..`.
pub fn is_path_safe(name: &str) -> bool {
    !name.contains("..") && PATH_SAFE_RE.as_ref().is_some_and(|re| re.is_match(name))
}

/// A packaged system description, as submitted for deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub manifest: Manifest,
    #[serde(default)]
    pub workflow: WorkflowGraph,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub integrations: Vec<IntegrationSpec>,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub secrets: Vec<SecretPlaceholder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPattern {
    Cron,
    Webhook,
    Messaging,
    AlwaysOn,
}

impl TriggerPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerPattern::Cron => "cron",
            TriggerPattern::Webhook => "webhook",
            TriggerPattern::Messaging => "messaging",
            TriggerPattern::AlwaysOn => "always_on",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required_inputs: Vec<RequiredInput>,
    pub trigger_pattern: TriggerPattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<EstimatedCost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedCost {
    #[serde(default)]
    pub per_run_usd: Option<f64>,
    #[serde(default)]
    pub monthly_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Process-manager start options. `cwd` and the process name are always
/// decided at deploy time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub max_memory_restart: Option<String>,
    #[serde(default)]
    pub instances: Option<u32>,
    #[serde(default)]
    pub autorestart: Option<bool>,
}

impl ProcessConfig {
    pub fn has_script(&self) -> bool {
        self.script.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretPlaceholder {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl Bundle {
    pub fn slug(&self) -> &str {
        &self.manifest.slug
    }

    pub fn validate(&self) -> FleetResult<()> {
        let m = &self.manifest;
        if m.name.trim().is_empty() {
            return Err(FleetError::Validation("manifest name is empty".to_string()));
        }
        if !is_valid_slug(&m.slug) {
            return Err(FleetError::Validation(format!(
                "slug `{}` must match ^[a-z0-9][a-z0-9-]{{0,62}}$",
                m.slug
            )));
        }

        let mut keys = HashSet::new();
        for agent in &self.agents {
            if !is_path_safe(&agent.key) {
                return Err(FleetError::Validation(format!(
                    "agent key `{}` is not a safe path component",
                    agent.key
                )));
            }
            if !keys.insert(agent.key.as_str()) {
                return Err(FleetError::Validation(format!(
                    "duplicate agent key `{}`",
                    agent.key
                )));
            }
        }

        let mut names = HashSet::new();
        for integration in &self.integrations {
            if !is_path_safe(&integration.name) {
                return Err(FleetError::Validation(format!(
                    "integration name `{}` is not a safe path component",
                    integration.name
                )));
            }
            if !names.insert(integration.name.as_str()) {
                return Err(FleetError::Validation(format!(
                    "duplicate integration `{}`",
                    integration.name
                )));
            }
        }
        Ok(())
    }
}
