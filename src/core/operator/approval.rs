use tracing::{info, warn};

use super::{OperatorLoop, merge_config};
use crate::core::deploy::restart_options;
use crate::core::error::FleetResult;
use crate::core::registry::{DeploymentStatus, OperatorActionRecord, OperatorType};

impl OperatorLoop {
    /// Approve a pending action. Approved optimizations are applied to the
    /// deployment's operational config and its process is restarted; a
    /// failed restart is logged only.
    pub async fn approve(&self, id: &str) -> FleetResult<OperatorActionRecord> {
        let action = self.registry.resolve_operator_action(id, true).await?;
        info!("Operator action {} ({}) approved", id, action.action_type);
        if action.operator_type == OperatorType::Optimization {
            self.apply_optimization(&action).await?;
        }
        Ok(action)
    }

    pub async fn reject(&self, id: &str) -> FleetResult<OperatorActionRecord> {
        let action = self.registry.resolve_operator_action(id, false).await?;
        info!("Operator action {} ({}) rejected", id, action.action_type);
        Ok(action)
    }

    async fn apply_optimization(&self, action: &OperatorActionRecord) -> FleetResult<()> {
        let Some(deployment) = self.registry.get_deployment(&action.deployment_id).await? else {
            warn!(
                "Deployment {} is gone; approved optimization {} not applied",
                action.deployment_id, action.id
            );
            return Ok(());
        };
        let merged = merge_config(&deployment.operational_config, &action.after_state);
        self.registry
            .update_operational_config(&deployment.id, &merged)
            .await?;

        match self
            .supervisor
            .restart_with(&deployment.process_name, &restart_options(&merged))
            .await
        {
            Ok(_) => {
                if let Err(e) = self
                    .registry
                    .update_deployment_status(&deployment.id, DeploymentStatus::Deployed)
                    .await
                {
                    warn!("Could not mark [{}] deployed: {}", deployment.slug, e);
                }
                info!("[{}] restarted with optimization {}", deployment.slug, action.id);
            }
            Err(e) => warn!(
                "Restart of [{}] after optimization {} failed: {}",
                deployment.slug, action.id, e
            ),
        }
        Ok(())
    }
}
