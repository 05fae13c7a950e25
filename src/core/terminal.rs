use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", ROCKET, style(step).bold());
}

pub fn print_action(msg: &str) {
    println!("{} {}", WRENCH, msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// Colour a deployment / process / run status word.
pub fn styled_status(status: &str) -> String {
    match status {
        "deployed" | "online" | "success" => style(status).green().to_string(),
        "stopped" | "launching" | "partial" | "running" => style(status).yellow().to_string(),
        "errored" | "failed" => style(status).red().bold().to_string(),
        other => style(other).dim().to_string(),
    }
}

pub fn print_banner() {
    println!();
    println!(
        "{}",
        style("  agentfleet").bold().cyan()
    );
    println!(
        "{}\n",
        style("  deploy, run and heal multi-agent systems").dim()
    );
}
