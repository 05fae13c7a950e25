//! PM2-backed daemon adapter. Talks to the PM2 god daemon through its CLI.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    DaemonConnection, ProcessDaemon, ProcessSpec, ProcessState, ProcessStatus, RestartOptions,
};
use crate::platform::{NativePlatform, Platform};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Pm2Daemon {
    bin: String,
}

impl Pm2Daemon {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl ProcessDaemon for Pm2Daemon {
    async fn connect(&self) -> Result<Box<dyn DaemonConnection>> {
        // `pm2 ping` spawns the god daemon if needed and fails fast if pm2 is missing.
        run_pm2(&self.bin, &["ping".to_string()], None).await?;
        Ok(Box::new(Pm2Connection {
            bin: self.bin.clone(),
            open: true,
        }))
    }
}

struct Pm2Connection {
    bin: String,
    open: bool,
}

impl Pm2Connection {
    async fn run(&self, args: &[String], spec: Option<&ProcessSpec>) -> Result<String> {
        if !self.open {
            return Err(anyhow!("pm2 connection already closed"));
        }
        run_pm2(&self.bin, args, spec).await
    }
}

#[async_trait]
impl DaemonConnection for Pm2Connection {
    async fn start(&mut self, spec: &ProcessSpec) -> Result<()> {
        self.run(&start_args(spec), Some(spec)).await.map(|_| ())
    }

    async fn stop(&mut self, name: &str) -> Result<()> {
        self.run(&["stop".to_string(), name.to_string()], None)
            .await
            .map(|_| ())
    }

    async fn restart(&mut self, name: &str, options: &RestartOptions) -> Result<()> {
        self.run(&restart_args(name, options), None)
            .await
            .map(|_| ())
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        self.run(&["delete".to_string(), name.to_string()], None)
            .await
            .map(|_| ())
    }

    async fn describe(&mut self, name: &str) -> Result<Option<ProcessStatus>> {
        Ok(self.list().await?.into_iter().find(|p| p.name == name))
    }

    async fn list(&mut self) -> Result<Vec<ProcessStatus>> {
        let out = self.run(&["jlist".to_string()], None).await?;
        parse_jlist(&out, now_ms())
    }

    async fn disconnect(&mut self) {
        self.open = false;
    }
}

async fn run_pm2(bin: &str, args: &[String], spec: Option<&ProcessSpec>) -> Result<String> {
    let mut cmd = NativePlatform::process_manager_command(bin);
    cmd.args(args);
    if let Some(spec) = spec {
        cmd.envs(&spec.env);
    }
    debug!("pm2 {}", args.join(" "));
    let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
        .await
        .map_err(|_| anyhow!("pm2 {} timed out", args.first().map_or("", |a| a.as_str())))??;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "pm2 {} exited with {}: {}",
            args.first().map_or("", |a| a.as_str()),
            output.status,
            stderr.trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn start_args(spec: &ProcessSpec) -> Vec<String> {
    let mut args = vec![
        "start".to_string(),
        spec.script.clone(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    if let Some(cwd) = &spec.cwd {
        args.push("--cwd".to_string());
        args.push(cwd.display().to_string());
    }
    if let Some(interpreter) = &spec.interpreter {
        args.push("--interpreter".to_string());
        args.push(interpreter.clone());
    }
    if let Some(limit) = &spec.max_memory_restart {
        args.push("--max-memory-restart".to_string());
        args.push(limit.clone());
    }
    if let Some(instances) = spec.instances {
        args.push("--instances".to_string());
        args.push(instances.to_string());
    }
    if spec.autorestart == Some(false) {
        args.push("--no-autorestart".to_string());
    }
    if !spec.args.is_empty() {
        args.push("--".to_string());
        args.extend(spec.args.iter().cloned());
    }
    args
}

fn restart_args(name: &str, options: &RestartOptions) -> Vec<String> {
    let mut args = vec![
        "restart".to_string(),
        name.to_string(),
        "--update-env".to_string(),
    ];
    if let Some(limit) = &options.max_memory_restart {
        args.push("--max-memory-restart".to_string());
        args.push(limit.clone());
    }
    args
}

#[derive(Deserialize)]
struct JlistEntry {
    name: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    pm2_env: JlistEnv,
    #[serde(default)]
    monit: JlistMonit,
}

#[derive(Deserialize, Default)]
struct JlistEnv {
    #[serde(default)]
    status: String,
    #[serde(default)]
    pm_uptime: Option<u64>,
    #[serde(default)]
    restart_time: Option<u32>,
    #[serde(default)]
    pm_err_log_path: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct JlistMonit {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: u64,
}

/// The first line starting with `[` that opens a valid entry array. Banner
/// lines such as `[PM2] Spawning PM2 daemon` also start with `[`.
fn find_entries(raw: &str) -> Result<Vec<JlistEntry>> {
    let mut last_err = None;
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        let start = offset + (line.len() - line.trim_start().len());
        offset += line.len();
        if !raw[start..].starts_with('[') {
            continue;
        }
        let mut stream =
            serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Vec<JlistEntry>>();
        match stream.next() {
            Some(Ok(entries)) => return Ok(entries),
            Some(Err(e)) => last_err = Some(e),
            None => {}
        }
    }
    Err(match last_err {
        Some(e) => anyhow!("pm2 jlist output is not a process list: {}", e),
        None => anyhow!("pm2 jlist returned no JSON array"),
    })
}

fn parse_jlist(raw: &str, now_ms: u64) -> Result<Vec<ProcessStatus>> {
    let entries = find_entries(raw)?;
    Ok(entries
        .into_iter()
        .map(|e| {
            let status = ProcessState::from_pm2(&e.pm2_env.status);
            let uptime_ms = match (status, e.pm2_env.pm_uptime) {
                (ProcessState::Online, Some(started)) => now_ms.saturating_sub(started),
                _ => 0,
            };
            ProcessStatus {
                name: e.name,
                pid: e.pid.filter(|p| *p > 0),
                status,
                cpu: e.monit.cpu,
                memory: e.monit.memory,
                uptime_ms,
                restarts: e.pm2_env.restart_time.unwrap_or(0),
                error_log_path: e.pm2_env.pm_err_log_path,
            }
        })
        .collect())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
