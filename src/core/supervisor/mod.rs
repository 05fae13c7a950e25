//! Process supervision on top of a process-manager daemon.
//!
//! Every public call opens its own daemon connection and closes it before
//! returning, including on the error path. `start` and `restart` only return
//! once the daemon reports the process `online`.

mod pm2;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::core::config::SupervisorConfig;
use crate::core::error::{FleetError, FleetResult};

pub use pm2::Pm2Daemon;
pub use types::{ProcessSpec, ProcessState, ProcessStatus, RestartOptions};

/// Entry point to a process-manager daemon.
#[async_trait]
pub trait ProcessDaemon: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Box<dyn DaemonConnection>>;
}

/// One short-lived session with the daemon.
#[async_trait]
pub trait DaemonConnection: Send {
    async fn start(&mut self, spec: &ProcessSpec) -> anyhow::Result<()>;
    async fn stop(&mut self, name: &str) -> anyhow::Result<()>;
    async fn restart(&mut self, name: &str, options: &RestartOptions) -> anyhow::Result<()>;
    async fn delete(&mut self, name: &str) -> anyhow::Result<()>;
    /// `Ok(None)` when the daemon does not know the process.
    async fn describe(&mut self, name: &str) -> anyhow::Result<Option<ProcessStatus>>;
    async fn list(&mut self) -> anyhow::Result<Vec<ProcessStatus>>;
    async fn disconnect(&mut self);
}

pub fn process_name_for(prefix: &str, slug: &str) -> String {
    format!("{}-{}", prefix, slug)
}

pub fn slug_from_process_name<'a>(prefix: &str, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|slug| !slug.is_empty())
}

pub struct ProcessSupervisor {
    daemon: Arc<dyn ProcessDaemon>,
    prefix: String,
    poll_interval: Duration,
    start_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(daemon: Arc<dyn ProcessDaemon>, config: &SupervisorConfig) -> Self {
        Self {
            daemon,
            prefix: config.process_prefix.clone(),
            poll_interval: config.poll_interval(),
            start_timeout: config.start_timeout(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn process_name(&self, slug: &str) -> String {
        process_name_for(&self.prefix, slug)
    }

    pub fn slug_for<'a>(&self, process_name: &'a str) -> Option<&'a str> {
        slug_from_process_name(&self.prefix, process_name)
    }

    async fn connect(&self, name: &str) -> FleetResult<Box<dyn DaemonConnection>> {
        self.daemon
            .connect()
            .await
            .map_err(|e| FleetError::supervisor(name, format!("daemon unreachable: {}", e)))
    }

    pub async fn start(&self, spec: &ProcessSpec) -> FleetResult<ProcessStatus> {
        let name = spec.name.as_str();
        {
            let mut conn = self.connect(name).await?;
            let result = conn.start(spec).await;
            conn.disconnect().await;
            result.map_err(|e| FleetError::supervisor(name, e))?;
        }
        info!("Started process [{}], waiting for online", name);
        self.wait_until_online(name).await
    }

    pub async fn stop(&self, name: &str) -> FleetResult<()> {
        let mut conn = self.connect(name).await?;
        let result = conn.stop(name).await;
        conn.disconnect().await;
        result.map_err(|e| FleetError::supervisor(name, e))
    }

    pub async fn restart(&self, name: &str) -> FleetResult<ProcessStatus> {
        self.restart_with(name, &RestartOptions::default()).await
    }

    /// Restart, re-applying `options` to the running process.
    pub async fn restart_with(
        &self,
        name: &str,
        options: &RestartOptions,
    ) -> FleetResult<ProcessStatus> {
        {
            let mut conn = self.connect(name).await?;
            let result = conn.restart(name, options).await;
            conn.disconnect().await;
            result.map_err(|e| FleetError::supervisor(name, e))?;
        }
        info!("Restarted process [{}], waiting for online", name);
        self.wait_until_online(name).await
    }

    pub async fn delete(&self, name: &str) -> FleetResult<()> {
        let mut conn = self.connect(name).await?;
        let result = conn.delete(name).await;
        conn.disconnect().await;
        result.map_err(|e| FleetError::supervisor(name, e))
    }

    pub async fn describe(&self, name: &str) -> FleetResult<Option<ProcessStatus>> {
        let mut conn = self.connect(name).await?;
        let result = conn.describe(name).await;
        conn.disconnect().await;
        result.map_err(|e| FleetError::supervisor(name, e))
    }

    /// All daemon processes carrying this fleet's prefix.
    pub async fn list(&self) -> FleetResult<Vec<ProcessStatus>> {
        let scope = format!("{}-*", self.prefix);
        let mut conn = self.connect(&scope).await?;
        let result = conn.list().await;
        conn.disconnect().await;
        let all = result.map_err(|e| FleetError::supervisor(&scope, e))?;
        Ok(all
            .into_iter()
            .filter(|p| self.slug_for(&p.name).is_some())
            .collect())
    }

    async fn wait_until_online(&self, name: &str) -> FleetResult<ProcessStatus> {
        let poll = async {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the first describe happens one period in
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.describe(name).await? {
                    Some(status) if status.status == ProcessState::Online => return Ok(status),
                    Some(status) if status.status == ProcessState::Errored => {
                        return Err(FleetError::supervisor(
                            name,
                            "process entered errored state",
                        ));
                    }
                    Some(status) => debug!("Process [{}] is {}", name, status.status.as_str()),
                    None => debug!("Process [{}] not yet visible to daemon", name),
                }
            }
        };

        match tokio::time::timeout(self.start_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::supervisor(
                name,
                format!(
                    "timed out after {}ms waiting for process to come online",
                    self.start_timeout.as_millis()
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests;
