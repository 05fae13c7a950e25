
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::SupervisorConfig;
use crate::core::supervisor::ProcessSupervisor;
use crate::core::supervisor::testing::FakeDaemon;

pub(super) fn supervisor(daemon: &FakeDaemon) -> ProcessSupervisor {
    ProcessSupervisor::new(Arc::new(daemon.clone()), &SupervisorConfig::default())
}

pub(super) fn spec(name: &str) -> crate::core::supervisor::ProcessSpec {
    crate::core::supervisor::ProcessSpec {
        name: name.to_string(),
        script: "index.js".to_string(),
        ..Default::default()
    }
}

pub(super) const POLL: Duration = Duration::from_millis(500);
