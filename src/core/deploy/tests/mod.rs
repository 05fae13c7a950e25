mod pipeline;

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::core::config::SupervisorConfig;
use crate::core::deploy::{Bundle, DeploymentOrchestrator};
use crate::core::registry::Registry;
use crate::core::supervisor::ProcessSupervisor;
use crate::core::supervisor::testing::FakeDaemon;

pub(super) fn orchestrator(daemon: &FakeDaemon, root: &Path) -> (DeploymentOrchestrator, Registry) {
    let registry = Registry::in_memory().unwrap();
    let supervisor = Arc::new(ProcessSupervisor::new(
        Arc::new(daemon.clone()),
        &SupervisorConfig::default(),
    ));
    (
        DeploymentOrchestrator::new(registry.clone(), supervisor, root.to_path_buf()),
        registry,
    )
}

pub(super) fn bundle(slug: &str) -> Bundle {
    serde_json::from_value(json!({
        "manifest": {
            "name": "Test System",
            "slug": slug,
            "category": "research",
            "triggerPattern": "cron"
        },
        "workflow": {
            "nodes": [
                {"id": "o", "type": "agent", "label": "Chief"},
                {"id": "l", "type": "agent", "label": "Research", "parentId": "d"},
                {"id": "s", "type": "agent", "label": "Scraper", "parentId": "d"}
            ],
            "edges": [
                {"id": "e1", "source": "o", "target": "l", "type": "delegation"},
                {"id": "e2", "source": "l", "target": "s", "type": "delegation"}
            ]
        },
        "agents": [
            {"key": "chief", "name": "Chief", "model": "gpt-4o", "systemPrompt": "Lead the team.", "timeoutMs": 90000},
            {"key": "scraper", "name": "Scraper", "timeoutMs": 150000}
        ],
        "integrations": [
            {"name": "web-search", "command": "npx", "args": ["search-mcp"], "env": {"REGION": "eu"}}
        ],
        "process": {"script": "index.js", "env": {"NODE_ENV": "production"}},
        "secrets": [{"key": "OPENAI_API_KEY", "required": true}]
    }))
    .unwrap()
}
