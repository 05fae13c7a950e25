use anyhow::{Result, bail};
use console::style;

use super::open_context;
use crate::core::registry::{ActionFilter, OperatorActionRecord};
use crate::core::terminal::{print_action, print_info, print_status, print_success, print_warn};

fn approval_word(record: &OperatorActionRecord) -> String {
    match record.approved {
        None => style("pending").yellow().to_string(),
        Some(true) => style("approved").green().to_string(),
        Some(false) => style("rejected").red().to_string(),
    }
}

fn print_record(record: &OperatorActionRecord) {
    println!(
        "  {} {:<14} {:<20} {} {}",
        style(&record.id).dim(),
        record.operator_type.as_str(),
        style(&record.action_type).bold(),
        approval_word(record),
        if record.auto_applied { "(auto)" } else { "" }
    );
    println!("      {}", record.description);
}

pub async fn list(pending_only: bool) -> Result<()> {
    let ctx = open_context().await?;
    let filter = if pending_only {
        ActionFilter::pending()
    } else {
        ActionFilter::default()
    };
    let actions = ctx.registry.list_operator_actions(&filter).await?;
    if actions.is_empty() {
        print_info("No operator actions.");
        return Ok(());
    }
    for action in &actions {
        print_record(action);
    }
    Ok(())
}

pub async fn resolve(id: &str, approve: bool) -> Result<()> {
    let ctx = open_context().await?;
    let operator = ctx.operator.operator();
    let record = if approve {
        operator.approve(id).await?
    } else {
        operator.reject(id).await?
    };
    print_success(&format!(
        "{} {} ({})",
        if approve { "Approved" } else { "Rejected" },
        record.id,
        record.action_type
    ));
    Ok(())
}

pub async fn run_once() -> Result<()> {
    let ctx = open_context().await?;
    let Some(report) = ctx.operator.try_cycle().await else {
        bail!("an operator cycle is already running");
    };
    let report = report?;
    print_status("Inspected", &report.inspected.to_string());
    print_status("Orphans skipped", &report.skipped_orphans.to_string());
    print_status("Stopped skipped", &report.skipped_stopped.to_string());
    for action in &report.actions {
        print_action(&format!("{}: {}", action.action_type, action.description));
    }
    for err in &report.errors {
        print_warn(&format!("{}: {}", err.process, err.message));
    }
    if report.actions.is_empty() && report.errors.is_empty() {
        print_success("Every process is healthy.");
    }
    Ok(())
}
