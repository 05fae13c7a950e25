use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{CycleReport, OperatorLoop};
use crate::core::error::FleetResult;
use crate::core::lifecycle::LifecycleManager;

/// Shared handle that lets at most one operator cycle run at a time, whether
/// it was started by the cron job or by hand.
#[derive(Clone)]
pub struct SingleFlight {
    operator: Arc<OperatorLoop>,
    gate: Arc<Mutex<()>>,
}

impl SingleFlight {
    pub fn new(operator: Arc<OperatorLoop>) -> Self {
        Self {
            operator,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn operator(&self) -> &Arc<OperatorLoop> {
        &self.operator
    }

    /// `None` when another cycle is still running.
    pub async fn try_cycle(&self) -> Option<FleetResult<CycleReport>> {
        let _guard = self.gate.try_lock().ok()?;
        Some(self.operator.run_cycle().await)
    }
}

/// Register the periodic operator cycle on the lifecycle scheduler.
pub async fn schedule_cycles(
    lifecycle: &LifecycleManager,
    operator: SingleFlight,
    cron: &str,
) -> Result<()> {
    match tokio_cron_scheduler::Job::new_async(cron, move |_uuid, mut _l| {
        let operator = operator.clone();
        Box::pin(async move {
            match operator.try_cycle().await {
                None => warn!("Previous operator cycle still running, skipping this tick"),
                Some(Ok(_)) => {}
                Some(Err(e)) => error!("Operator cycle failed: {}", e),
            }
        })
    }) {
        Ok(job) => {
            lifecycle.scheduler.add(job).await?;
            info!("Operator cycle scheduled ({})", cron);
        }
        Err(e) => {
            error!("Invalid operator schedule `{}`: {}", cron, e);
        }
    }
    Ok(())
}
