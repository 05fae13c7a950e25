use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;

use super::open_context;
use crate::core::deploy::Bundle;
use crate::core::plan::{self, ExecutionPlan};
use crate::core::terminal::{self, print_info, print_status, print_step, print_success, print_warn};

pub(crate) async fn read_bundle(path: &str) -> Result<Bundle> {
    let raw = tokio::fs::read_to_string(Path::new(path))
        .await
        .with_context(|| format!("reading bundle {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing bundle {}", path))
}

fn print_plan(plan: &ExecutionPlan) {
    for (idx, phase) in plan.phases.iter().enumerate() {
        let mode = if phase.parallel { "parallel" } else { "sequential" };
        println!(
            "  {} {} {}",
            style(format!("{}.", idx + 1)).dim(),
            style(&phase.name).bold(),
            style(format!("({})", mode)).dim()
        );
        for member in &phase.members {
            println!("       - {}", member);
        }
    }
}

pub async fn deploy(path: &str) -> Result<()> {
    let bundle = read_bundle(path).await?;
    let ctx = open_context().await?;
    print_step(&format!("Deploying [{}]", bundle.slug()));
    let record = ctx.orchestrator.deploy(&bundle).await?;
    print_success(&format!(
        "Deployed [{}] as process {}",
        record.slug, record.process_name
    ));
    Ok(())
}

pub async fn undeploy(slug: &str) -> Result<()> {
    let ctx = open_context().await?;
    let record = ctx.orchestrator.undeploy(slug).await?;
    print_success(&format!("Archived [{}]", record.slug));
    Ok(())
}

pub async fn status(slug: Option<&str>) -> Result<()> {
    let ctx = open_context().await?;
    let Some(slug) = slug else {
        let deployments = ctx.registry.list_deployments().await?;
        if deployments.is_empty() {
            print_info("No deployments yet.");
            return Ok(());
        }
        for d in deployments {
            println!(
                "  {:<24} {:<10} {}",
                style(&d.slug).bold(),
                terminal::styled_status(d.status.as_str()),
                style(&d.process_name).dim()
            );
        }
        return Ok(());
    };

    let (record, process) = ctx.orchestrator.status(slug).await?;
    print_status("Deployment", &record.name);
    print_status("Status", &terminal::styled_status(record.status.as_str()));
    print_status("Process", &record.process_name);
    match process {
        Some(p) => {
            print_status("Process state", &terminal::styled_status(p.status.as_str()));
            print_status("Restarts", &p.restarts.to_string());
            print_status("Memory", &format!("{} bytes", p.memory));
        }
        None => print_warn("Process is not known to the daemon."),
    }
    print_status("Config", &record.operational_config.to_string());
    Ok(())
}

/// Compile only; nothing is deployed or opened.
pub async fn plan(path: &str) -> Result<()> {
    let bundle = read_bundle(path).await?;
    let plan = plan::compile(&bundle.workflow);
    if plan.is_empty() {
        print_warn("The workflow has no agents.");
        return Ok(());
    }
    print_step(&format!(
        "{} phases, {} agents",
        plan.phases.len(),
        plan.agent_count()
    ));
    print_plan(&plan);
    Ok(())
}

pub async fn run(slug: &str, input: Option<&str>) -> Result<()> {
    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw).context("--input is not valid JSON")?,
        None => Value::Null,
    };
    let ctx = open_context().await?;
    print_step(&format!("Running [{}]", slug));
    let (run_id, result) = ctx.runs.run(slug, input, "cli").await?;

    for phase in &result.phases {
        println!("  {} {:?}", style(&phase.name).bold(), phase.status);
        for agent in &phase.agents {
            let detail = agent.error.as_deref().unwrap_or("");
            println!(
                "     {:<20} {:?} {}ms {}",
                agent.label,
                agent.status,
                agent.duration_ms,
                style(detail).red()
            );
        }
    }
    print_status("Run", &run_id);
    print_status("Result", &terminal::styled_status(result.status.as_str()));
    print_status(
        "Tokens",
        &format!("{} (${:.4})", result.totals.tokens(), result.totals.cost_usd),
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&Value::Object(result.context))?
    );
    Ok(())
}
