//! Diagnosis → remediation table.

use serde_json::{Map, Value, json};

use super::diagnosis::{Diagnosis, DiagnosisKind};
use crate::core::config::OperatorConfig;
use crate::core::deploy::DEFAULT_MAX_MEMORY_RESTART;
use crate::core::engine::DEFAULT_AGENT_TIMEOUT_MS;

pub const ACTION_ROTATE_API_KEY: &str = "rotate_api_key";
pub const ACTION_FLAG_EXPIRED_KEY: &str = "flag_expired_key";
pub const ACTION_ADD_FALLBACK_MODEL: &str = "add_fallback_model";
pub const ACTION_INCREASE_TIMEOUT: &str = "increase_timeout";
pub const ACTION_INCREASE_MEMORY: &str = "increase_memory";
pub const ACTION_FLAG_MALFORMED_CONFIG: &str = "flag_malformed_config";
pub const ACTION_FLAG_DEPENDENCY_FAILURE: &str = "flag_dependency_failure";
pub const ACTION_FLAG_UNKNOWN: &str = "flag_unknown";

#[derive(Debug, Clone, Default)]
pub struct RemediationPolicy {
    pub fallback_model: String,
    /// Name of an environment variable holding a backup credential. Only set
    /// when that variable is actually present.
    pub backup_credential_env: Option<String>,
}

impl RemediationPolicy {
    pub fn from_config(config: &OperatorConfig) -> Self {
        let backup_credential_env = config
            .backup_credential_env
            .as_ref()
            .filter(|name| {
                std::env::var(name.as_str())
                    .map(|v| !v.trim().is_empty())
                    .unwrap_or(false)
            })
            .cloned();
        Self {
            fallback_model: config.fallback_model.clone(),
            backup_credential_env,
        }
    }
}

/// What the operator will do for one diagnosis. `before_state` and
/// `after_state` only carry the operational-config keys being changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Remediation {
    pub action_type: &'static str,
    pub description: String,
    pub before_state: Value,
    pub after_state: Value,
    pub auto_applied: bool,
}

impl Remediation {
    fn flag(action_type: &'static str, description: String) -> Self {
        Self {
            action_type,
            description,
            before_state: json!({}),
            after_state: json!({}),
            auto_applied: false,
        }
    }

    pub fn changes_config(&self) -> bool {
        self.after_state.as_object().is_some_and(|m| !m.is_empty())
    }
}

pub fn decide(diagnosis: &Diagnosis, config: &Value, policy: &RemediationPolicy) -> Remediation {
    match diagnosis.kind {
        DiagnosisKind::ExpiredKey => match &policy.backup_credential_env {
            Some(backup) => Remediation {
                action_type: ACTION_ROTATE_API_KEY,
                description: format!("API key expired; switching to credential from {}", backup),
                before_state: snapshot(config, &["apiKeyEnv"]),
                after_state: json!({ "apiKeyEnv": backup }),
                auto_applied: true,
            },
            None => Remediation::flag(
                ACTION_FLAG_EXPIRED_KEY,
                format!(
                    "API key expired and no backup credential is configured: {}",
                    diagnosis.detail
                ),
            ),
        },
        DiagnosisKind::RateLimit => Remediation {
            action_type: ACTION_ADD_FALLBACK_MODEL,
            description: format!(
                "Rate limited; falling back to {}",
                policy.fallback_model
            ),
            before_state: snapshot(config, &["fallbackModel", "rateLimitMitigation"]),
            after_state: json!({
                "fallbackModel": policy.fallback_model,
                "rateLimitMitigation": true,
            }),
            auto_applied: true,
        },
        DiagnosisKind::Timeout => {
            let current = config
                .get("timeoutMs")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_AGENT_TIMEOUT_MS);
            let doubled = current.saturating_mul(2);
            Remediation {
                action_type: ACTION_INCREASE_TIMEOUT,
                description: format!("Timeouts observed; timeoutMs {} -> {}", current, doubled),
                before_state: json!({ "timeoutMs": current }),
                after_state: json!({ "timeoutMs": doubled }),
                auto_applied: true,
            }
        }
        DiagnosisKind::Oom => {
            let current = config
                .get("maxMemoryRestart")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MAX_MEMORY_RESTART);
            let doubled = double_memory(current);
            Remediation {
                action_type: ACTION_INCREASE_MEMORY,
                description: format!("Out of memory; maxMemoryRestart {} -> {}", current, doubled),
                before_state: json!({ "maxMemoryRestart": current }),
                after_state: json!({ "maxMemoryRestart": doubled }),
                auto_applied: true,
            }
        }
        DiagnosisKind::MalformedConfig => Remediation::flag(
            ACTION_FLAG_MALFORMED_CONFIG,
            format!("Malformed configuration: {}", diagnosis.detail),
        ),
        DiagnosisKind::DependencyFailure => Remediation::flag(
            ACTION_FLAG_DEPENDENCY_FAILURE,
            format!("Dependency failure: {}", diagnosis.detail),
        ),
        DiagnosisKind::Unknown => Remediation::flag(
            ACTION_FLAG_UNKNOWN,
            format!("Unclassified failure: {}", diagnosis.detail),
        ),
    }
}

/// Current values of `keys`, `null` for absent ones.
pub(crate) fn snapshot(config: &Value, keys: &[&str]) -> Value {
    let mut out = Map::new();
    for key in keys {
        out.insert(
            key.to_string(),
            config.get(*key).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}

/// Shallow-merge `patch` into `config`. A non-object config is replaced.
pub fn merge_config(config: &Value, patch: &Value) -> Value {
    let mut merged = match config {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(patch) = patch {
        for (k, v) in patch {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

/// Double a PM2 memory limit such as `256M`, `1G` or a plain byte count.
/// Unparseable values are treated as the default limit.
pub fn double_memory(limit: &str) -> String {
    let trimmed = limit.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let unit = unit.trim().to_ascii_uppercase();
    match digits.parse::<u64>() {
        Ok(n) if n > 0 && matches!(unit.as_str(), "" | "K" | "M" | "G") => {
            format!("{}{}", n.saturating_mul(2), unit)
        }
        _ => double_memory(DEFAULT_MAX_MEMORY_RESTART),
    }
}
