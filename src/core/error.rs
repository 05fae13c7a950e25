use rusqlite::ErrorCode;

pub type FleetResult<T> = std::result::Result<T, FleetError>;

/// Closed set of failures surfaced by the fleet core.
///
/// `Validation`, `Conflict` and `NotFound` are expected domain conditions and
/// pass through the deployment pipeline untouched. Everything else raised
/// inside a pipeline step is wrapped in `Deployment` with the step tag.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("process supervisor error for `{process}`: {message}")]
    Supervisor { process: String, message: String },
    #[error("deployment failed at step `{step}`: {source}")]
    Deployment {
        step: &'static str,
        #[source]
        source: Box<FleetError>,
    },
    #[error("diagnosis failed: {0}")]
    Diagnosis(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl FleetError {
    pub fn supervisor(process: &str, message: impl std::fmt::Display) -> Self {
        FleetError::Supervisor {
            process: process.to_string(),
            message: message.to_string(),
        }
    }

    /// Wrap a step failure unless it is already a domain error the caller
    /// should see verbatim.
    pub fn at_step(step: &'static str, err: FleetError) -> Self {
        match err {
            FleetError::Validation(_)
            | FleetError::Conflict(_)
            | FleetError::NotFound(_)
            | FleetError::Deployment { .. } => err,
            other => FleetError::Deployment {
                step,
                source: Box::new(other),
            },
        }
    }

    /// Stable machine-readable code, safe to show to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            FleetError::Validation(_) => "validation_error",
            FleetError::Conflict(_) => "conflict",
            FleetError::NotFound(_) => "not_found",
            FleetError::Supervisor { .. } => "supervisor_error",
            FleetError::Deployment { .. } => "deployment_failed",
            FleetError::Diagnosis(_) => "diagnosis_failed",
            FleetError::Storage(_) | FleetError::Internal(_) => "internal_error",
        }
    }

    pub fn step(&self) -> Option<&'static str> {
        match self {
            FleetError::Deployment { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for FleetError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, msg) = &err
            && inner.code == ErrorCode::ConstraintViolation
        {
            return FleetError::Conflict(
                msg.clone()
                    .unwrap_or_else(|| "constraint violation".to_string()),
            );
        }
        FleetError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Storage(format!("invalid json column: {}", err))
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::Internal(err.into())
    }
}
