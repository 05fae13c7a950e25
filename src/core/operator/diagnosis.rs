use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{FleetError, FleetResult};
use crate::core::llm::{ChatMessage, LlmProvider, extract_json_block};
use crate::core::supervisor::ProcessStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisKind {
    ExpiredKey,
    RateLimit,
    Timeout,
    Oom,
    MalformedConfig,
    DependencyFailure,
    Unknown,
}

impl DiagnosisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosisKind::ExpiredKey => "expired_key",
            DiagnosisKind::RateLimit => "rate_limit",
            DiagnosisKind::Timeout => "timeout",
            DiagnosisKind::Oom => "oom",
            DiagnosisKind::MalformedConfig => "malformed_config",
            DiagnosisKind::DependencyFailure => "dependency_failure",
            DiagnosisKind::Unknown => "unknown",
        }
    }

    /// Anything unrecognised is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "expired_key" => DiagnosisKind::ExpiredKey,
            "rate_limit" => DiagnosisKind::RateLimit,
            "timeout" => DiagnosisKind::Timeout,
            "oom" => DiagnosisKind::Oom,
            "malformed_config" => DiagnosisKind::MalformedConfig,
            "dependency_failure" => DiagnosisKind::DependencyFailure,
            _ => DiagnosisKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    pub kind: DiagnosisKind,
    pub detail: String,
}

impl Diagnosis {
    pub fn unknown(detail: impl Into<String>) -> Self {
        Self {
            kind: DiagnosisKind::Unknown,
            detail: detail.into(),
        }
    }
}

/// Classifies why a process is unhealthy from its recent error text.
#[async_trait]
pub trait DiagnosisOracle: Send + Sync {
    async fn diagnose(&self, process: &ProcessStatus, errors: &str) -> FleetResult<Diagnosis>;
}

pub struct LlmDiagnosisOracle {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmDiagnosisOracle {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

const SYSTEM_PROMPT: &str = "You diagnose failing agent processes. \
Reply with JSON only: {\"kind\": \"<kind>\", \"detail\": \"<one sentence>\"}. \
kind is one of: expired_key, rate_limit, timeout, oom, malformed_config, dependency_failure, unknown.";

#[derive(Deserialize)]
struct RawDiagnosis {
    kind: String,
    #[serde(default)]
    detail: String,
}

pub(crate) fn parse_diagnosis(reply: &str) -> FleetResult<Diagnosis> {
    let block = extract_json_block(reply)
        .ok_or_else(|| FleetError::Diagnosis("reply contained no JSON".to_string()))?;
    let raw: RawDiagnosis = serde_json::from_str(block)
        .map_err(|e| FleetError::Diagnosis(format!("unparseable reply: {}", e)))?;
    Ok(Diagnosis {
        kind: DiagnosisKind::parse(&raw.kind),
        detail: raw.detail,
    })
}

#[async_trait]
impl DiagnosisOracle for LlmDiagnosisOracle {
    async fn diagnose(&self, process: &ProcessStatus, errors: &str) -> FleetResult<Diagnosis> {
        let user = format!(
            "Process: {}\nStatus: {}\nRestarts: {}\nMemory: {} bytes\n\nRecent errors:\n{}",
            process.name,
            process.status.as_str(),
            process.restarts,
            process.memory,
            if errors.trim().is_empty() { "(none captured)" } else { errors }
        );
        let completion = self
            .provider
            .generate(
                &self.model,
                &[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
            )
            .await
            .map_err(|e| FleetError::Diagnosis(e.to_string()))?;
        debug!("Diagnosis reply for {}: {}", process.name, completion.content);
        parse_diagnosis(&completion.content)
    }
}
