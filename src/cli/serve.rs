use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::info;

use super::{data_dir, parse_api_server_flags};
use crate::core::config::FleetConfig;
use crate::core::context::{AppContext, RunReaper};
use crate::core::lifecycle::LifecycleManager;
use crate::core::operator::schedule_cycles;
use crate::core::terminal::{self, print_info, print_link, print_success};
use crate::interfaces::web::{ApiServer, ApiServerConfig, auth};
use crate::logging;

pub async fn run(args: &[String]) -> Result<()> {
    let dir = data_dir();
    let config = FleetConfig::load(&dir)
        .await
        .with_context(|| format!("loading config from {}", dir.display()))?;
    let (api_host, api_port) =
        parse_api_server_flags(args, 2, config.api.host.clone(), config.api.port);

    let log_tx = logging::init(config.tracing_level(), false);
    let operator_enabled = config.operator.enabled;
    let schedule = config.operator.schedule.clone();
    let ctx = AppContext::open(config, &dir).await?;

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        ctx: ctx.clone(),
        log_tx,
        api_host: api_host.clone(),
        api_port,
        api_token: auth::api_token_from_env(),
    }))));
    lifecycle.attach(Arc::new(Mutex::new(RunReaper::new(
        ctx.runs.runs().clone(),
    ))));

    if operator_enabled {
        schedule_cycles(&lifecycle, ctx.operator.clone(), &schedule).await?;
    } else {
        info!("Operator loop disabled in config");
    }

    lifecycle.start().await?;

    terminal::print_banner();
    print_success("agentfleet is running");
    print_link("API", &format!("http://{}:{}/api", api_host, api_port));
    print_info(&format!("Data directory: {}", dir.display()));
    print_info("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    lifecycle.shutdown().await?;
    Ok(())
}
