//! Filesystem artifacts written for a deployment.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tokio::fs;

use super::bundle::Bundle;
use crate::core::error::FleetResult;

pub const AGENT_CONFIG_FILE: &str = "agent.json";
pub const SYSTEM_PROMPT_FILE: &str = "SYSTEM.md";

/// Where one deployment's artifacts live under the deploy root.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployPaths {
    pub agents_dir: PathBuf,
    pub integrations_dir: PathBuf,
    pub trigger_file: PathBuf,
}

impl DeployPaths {
    pub fn for_slug(root: &Path, slug: &str) -> Self {
        Self {
            agents_dir: root.join("agents").join(slug),
            integrations_dir: root.join("config").join("integrations").join(slug),
            trigger_file: root
                .join("config")
                .join("triggers")
                .join(format!("{}.json", slug)),
        }
    }

    /// Stored on the deployment record as its path config.
    pub fn to_json(&self) -> Value {
        json!({
            "agentsDir": self.agents_dir,
            "integrationsDir": self.integrations_dir,
            "triggerFile": self.trigger_file,
        })
    }
}

async fn write_json(path: &Path, value: &Value) -> FleetResult<()> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).await?;
    Ok(())
}

pub async fn write_agent_configs(paths: &DeployPaths, bundle: &Bundle) -> FleetResult<()> {
    fs::create_dir_all(&paths.agents_dir).await?;
    for agent in &bundle.agents {
        let dir = paths.agents_dir.join(&agent.key);
        fs::create_dir_all(&dir).await?;
        write_json(&dir.join(AGENT_CONFIG_FILE), &serde_json::to_value(agent)?).await?;
        if let Some(prompt) = agent.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            fs::write(dir.join(SYSTEM_PROMPT_FILE), prompt).await?;
        }
    }
    Ok(())
}

pub async fn write_integration_configs(paths: &DeployPaths, bundle: &Bundle) -> FleetResult<()> {
    fs::create_dir_all(&paths.integrations_dir).await?;
    for integration in &bundle.integrations {
        let value = json!({
            "name": integration.name,
            "command": integration.command,
            "args": integration.args,
            "env": integration.env,
        });
        write_json(
            &paths
                .integrations_dir
                .join(format!("{}.json", integration.name)),
            &value,
        )
        .await?;
    }
    Ok(())
}

pub async fn write_trigger_config(paths: &DeployPaths, config: &Value) -> FleetResult<()> {
    if let Some(parent) = paths.trigger_file.parent() {
        fs::create_dir_all(parent).await?;
    }
    write_json(&paths.trigger_file, config).await
}

/// Missing directories count as removed.
pub async fn remove_dir(path: &Path) -> FleetResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn remove_file(path: &Path) -> FleetResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
