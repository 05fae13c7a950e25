//! Scripted in-memory daemon for tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{
    DaemonConnection, ProcessDaemon, ProcessSpec, ProcessState, ProcessStatus, RestartOptions,
};

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<String, ProcessStatus>,
    scripts: BTreeMap<String, VecDeque<ProcessState>>,
    failing: HashSet<String>,
    calls: Vec<String>,
    restart_options: Vec<RestartOptions>,
    start_delay: Option<std::time::Duration>,
    describe_calls: usize,
    connects: usize,
    disconnects: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeDaemon {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDaemon {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_process(self, name: &str, status: ProcessState) -> Self {
        self.state
            .lock()
            .unwrap()
            .processes
            .insert(name.to_string(), ProcessStatus::new(name, status));
        self
    }

    pub(crate) fn with_error_log(self, name: &str, path: &std::path::Path) -> Self {
        if let Some(p) = self.state.lock().unwrap().processes.get_mut(name) {
            p.error_log_path = Some(path.to_path_buf());
        }
        self
    }

    /// States handed out by successive `describe` calls for `name`; the last
    /// one sticks.
    pub(crate) fn script(self, name: &str, states: &[ProcessState]) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), states.iter().copied().collect());
        self
    }

    /// Make an operation (`connect`, `start`, `restart`, `stop`, `delete`,
    /// `list`) fail.
    pub(crate) fn failing(self, op: &str) -> Self {
        self.state.lock().unwrap().failing.insert(op.to_string());
        self
    }

    /// Hold every `start` for `delay` before the daemon accepts it.
    pub(crate) fn with_start_delay(self, delay: std::time::Duration) -> Self {
        self.state.lock().unwrap().start_delay = Some(delay);
        self
    }

    pub(crate) fn restart_options(&self) -> Vec<RestartOptions> {
        self.state.lock().unwrap().restart_options.clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn describe_calls(&self) -> usize {
        self.state.lock().unwrap().describe_calls
    }

    pub(crate) fn connection_counts(&self) -> (usize, usize) {
        let s = self.state.lock().unwrap();
        (s.connects, s.disconnects)
    }

    pub(crate) fn has_process(&self, name: &str) -> bool {
        self.state.lock().unwrap().processes.contains_key(name)
    }

    fn record(&self, op: &str, name: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("{}:{}", op, name));
        if s.failing.contains(op) {
            return Err(anyhow!("{} refused by fake daemon", op));
        }
        Ok(())
    }

    fn relaunch(&self, name: &str) {
        let mut s = self.state.lock().unwrap();
        let scripted = s.scripts.contains_key(name);
        let initial = if scripted {
            ProcessState::Launching
        } else {
            ProcessState::Online
        };
        let entry = s
            .processes
            .entry(name.to_string())
            .or_insert_with(|| ProcessStatus::new(name, initial));
        entry.status = initial;
    }
}

#[async_trait]
impl ProcessDaemon for FakeDaemon {
    async fn connect(&self) -> Result<Box<dyn DaemonConnection>> {
        {
            let mut s = self.state.lock().unwrap();
            s.connects += 1;
            if s.failing.contains("connect") {
                return Err(anyhow!("connection refused"));
            }
        }
        Ok(Box::new(FakeConnection {
            daemon: self.clone(),
        }))
    }
}

struct FakeConnection {
    daemon: FakeDaemon,
}

#[async_trait]
impl DaemonConnection for FakeConnection {
    async fn start(&mut self, spec: &ProcessSpec) -> Result<()> {
        let delay = self.daemon.state.lock().unwrap().start_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.daemon.record("start", &spec.name)?;
        self.daemon.relaunch(&spec.name);
        Ok(())
    }

    async fn stop(&mut self, name: &str) -> Result<()> {
        self.daemon.record("stop", name)?;
        if let Some(p) = self.daemon.state.lock().unwrap().processes.get_mut(name) {
            p.status = ProcessState::Stopped;
        }
        Ok(())
    }

    async fn restart(&mut self, name: &str, options: &RestartOptions) -> Result<()> {
        self.daemon.record("restart", name)?;
        self.daemon
            .state
            .lock()
            .unwrap()
            .restart_options
            .push(options.clone());
        if !self.daemon.has_process(name) {
            return Err(anyhow!("process {} not found", name));
        }
        self.daemon.relaunch(name);
        Ok(())
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        self.daemon.record("delete", name)?;
        self.daemon.state.lock().unwrap().processes.remove(name);
        Ok(())
    }

    async fn describe(&mut self, name: &str) -> Result<Option<ProcessStatus>> {
        let mut s = self.daemon.state.lock().unwrap();
        s.describe_calls += 1;
        let next = s.scripts.get_mut(name).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().copied()
            }
        });
        let proc = s.processes.get_mut(name);
        match (proc, next) {
            (Some(p), Some(state)) => {
                p.status = state;
                Ok(Some(p.clone()))
            }
            (Some(p), None) => Ok(Some(p.clone())),
            (None, _) => Ok(None),
        }
    }

    async fn list(&mut self) -> Result<Vec<ProcessStatus>> {
        self.daemon.record("list", "*")?;
        Ok(self
            .daemon
            .state
            .lock()
            .unwrap()
            .processes
            .values()
            .cloned()
            .collect())
    }

    async fn disconnect(&mut self) {
        self.daemon.state.lock().unwrap().disconnects += 1;
    }
}
