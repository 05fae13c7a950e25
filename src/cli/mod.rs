mod actions;
mod deployments;
mod serve;

use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;
use tracing::Level;

use crate::core::config::FleetConfig;
use crate::core::context::AppContext;
use crate::core::terminal::{self, print_error};
use crate::logging;
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    let section = |title: &str, rows: &[(&str, &str)]| {
        println!(" {}", style(title).bold().underlined());
        for (cmd, about) in rows {
            println!("   {:<28} {}", style(cmd).green(), about);
        }
        println!();
    };

    section(
        "Server",
        &[("serve [--api-host H] [--api-port P]", "Run the API, scheduler and operator loop")],
    );
    section(
        "Deployments",
        &[
            ("deploy <bundle.json>", "Deploy a system bundle"),
            ("undeploy <slug>", "Stop, clean up and archive a deployment"),
            ("status [slug]", "List deployments or show one with its process"),
            ("plan <bundle.json>", "Print the execution plan of a bundle"),
            ("run <slug> [--input <json>]", "Execute a deployment's plan once"),
        ],
    );
    section(
        "Operator",
        &[
            ("operator run-once", "Diagnose and heal unhealthy processes now"),
            ("actions [pending]", "List operator actions"),
            ("actions approve <id>", "Approve a pending action"),
            ("actions reject <id>", "Reject a pending action"),
        ],
    );

    println!(
        " {} {} <command> [args]\n",
        style("Usage:").bold(),
        style("agentfleet").green()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

/// Value following `flag`, if any.
pub(crate) fn flag_value<'a>(args: &'a [String], start: usize, flag: &str) -> Option<&'a str> {
    args.iter()
        .skip(start)
        .position(|a| a == flag)
        .and_then(|idx| args.get(start + idx + 1))
        .map(String::as_str)
}

/// First non-flag argument at or after `start`.
pub(crate) fn positional(args: &[String], start: usize) -> Option<&str> {
    let mut i = start;
    while i < args.len() {
        if args[i].starts_with("--") {
            i += 2;
            continue;
        }
        return Some(args[i].as_str());
    }
    None
}

pub(crate) fn data_dir() -> PathBuf {
    NativePlatform::data_dir()
}

/// Config plus a context on the live adapters, for one-shot commands.
pub(crate) async fn open_context() -> Result<AppContext> {
    let dir = data_dir();
    let config = FleetConfig::load(&dir)
        .await
        .with_context(|| format!("loading config from {}", dir.display()))?;
    logging::init(Level::WARN, false);
    AppContext::open(config, &dir).await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => serve::run(&args).await,
        "deploy" => match positional(&args, 2) {
            Some(path) => deployments::deploy(path).await,
            None => missing("deploy <bundle.json>"),
        },
        "undeploy" => match positional(&args, 2) {
            Some(slug) => deployments::undeploy(slug).await,
            None => missing("undeploy <slug>"),
        },
        "status" => deployments::status(positional(&args, 2)).await,
        "plan" => match positional(&args, 2) {
            Some(path) => deployments::plan(path).await,
            None => missing("plan <bundle.json>"),
        },
        "run" => match positional(&args, 2) {
            Some(slug) => deployments::run(slug, flag_value(&args, 2, "--input")).await,
            None => missing("run <slug>"),
        },
        "operator" => match args.get(2).map(String::as_str) {
            Some("run-once") => actions::run_once().await,
            _ => missing("operator run-once"),
        },
        "actions" => match (args.get(2).map(String::as_str), args.get(3)) {
            (None, _) => actions::list(false).await,
            (Some("pending"), _) => actions::list(true).await,
            (Some("approve"), Some(id)) => actions::resolve(id, true).await,
            (Some("reject"), Some(id)) => actions::resolve(id, false).await,
            _ => missing("actions [pending] | actions approve|reject <id>"),
        },
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

fn missing(usage: &str) -> Result<()> {
    print_error(&format!("Usage: agentfleet {}", usage));
    Ok(())
}
