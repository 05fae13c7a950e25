use std::time::Duration;

use serde_json::json;

use super::{bundle, orchestrator};
use crate::core::deploy::{DeployPaths, initial_operational_config};
use crate::core::error::FleetError;
use crate::core::registry::DeploymentStatus;
use crate::core::supervisor::ProcessState;
use crate::core::supervisor::testing::FakeDaemon;

#[tokio::test(start_paused = true)]
async fn deploy_writes_artifacts_registers_and_starts() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new();
    let (orch, registry) = orchestrator(&daemon, root.path());

    let record = orch.deploy(&bundle("news")).await.unwrap();

    let paths = DeployPaths::for_slug(root.path(), "news");
    let chief = paths.agents_dir.join("chief");
    assert!(chief.join("agent.json").exists());
    assert_eq!(
        std::fs::read_to_string(chief.join("SYSTEM.md")).unwrap(),
        "Lead the team."
    );
    assert!(!paths.agents_dir.join("scraper").join("SYSTEM.md").exists());

    let integration: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(paths.integrations_dir.join("web-search.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        integration,
        json!({"name": "web-search", "command": "npx", "args": ["search-mcp"], "env": {"REGION": "eu"}})
    );

    let trigger: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.trigger_file).unwrap()).unwrap();
    assert_eq!(trigger["expression"], "0 2 * * *");

    assert_eq!(record.status, DeploymentStatus::Deployed);
    assert_eq!(record.process_name, "fleet-news");
    assert_eq!(record.trigger_type.as_deref(), Some("cron"));
    assert_eq!(record.trigger_config, trigger);
    assert!(record.path_config["agentsDir"].is_string());
    assert_eq!(record.operational_config["timeoutMs"], 150000);
    assert_eq!(record.operational_config["maxMemoryRestart"], "256M");
    assert_eq!(record.operational_config["model"], "gpt-4o");
    assert_eq!(record.graph.nodes.len(), 3);

    assert!(daemon.has_process("fleet-news"));
    assert_eq!(daemon.calls(), vec!["start:fleet-news"]);
    assert!(registry.get_deployment_by_slug("news").await.unwrap().is_some());
}

#[tokio::test]
async fn invalid_bundle_is_rejected_before_any_side_effect() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new();
    let (orch, registry) = orchestrator(&daemon, root.path());
    let mut b = bundle("news");
    b.manifest.slug = "Not A Slug".into();

    let err = orch.deploy(&b).await.unwrap_err();

    assert!(matches!(err, FleetError::Validation(_)));
    assert!(!root.path().join("agents").exists());
    assert!(registry.list_deployments().await.unwrap().is_empty());
    assert_eq!(daemon.connection_counts(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn duplicate_slug_conflicts_and_leaves_live_deployment_alone() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new();
    let (orch, _) = orchestrator(&daemon, root.path());
    orch.deploy(&bundle("news")).await.unwrap();

    let err = orch.deploy(&bundle("news")).await.unwrap_err();

    assert!(matches!(err, FleetError::Conflict(_)), "{:?}", err);
    let paths = DeployPaths::for_slug(root.path(), "news");
    assert!(paths.agents_dir.join("chief").join("agent.json").exists());
    assert!(paths.trigger_file.exists());
    assert!(daemon.has_process("fleet-news"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_deploys_of_one_slug_share_nothing() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new().with_start_delay(Duration::from_secs(1));
    let (orch, registry) = orchestrator(&daemon, root.path());
    let (a, b) = (bundle("dup"), bundle("dup"));

    let (first, second) = tokio::join!(orch.deploy(&a), orch.deploy(&b));

    let record = first.unwrap();
    assert!(matches!(second, Err(FleetError::Conflict(_))), "{:?}", second);
    assert_eq!(record.status, DeploymentStatus::Deployed);
    let paths = DeployPaths::for_slug(root.path(), "dup");
    assert!(paths.agents_dir.join("chief").join("agent.json").exists());
    assert!(paths.integrations_dir.join("web-search.json").exists());
    assert!(paths.trigger_file.exists());
    assert!(daemon.has_process("fleet-dup"));
    assert_eq!(daemon.calls(), vec!["start:fleet-dup"]);
    assert_eq!(registry.list_deployments().await.unwrap().len(), 1);
    assert!(orch.in_flight.is_empty());
}

#[tokio::test]
async fn failed_reread_after_start_keeps_the_online_process() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new().with_start_delay(Duration::from_millis(300));
    let (orch, registry) = orchestrator(&daemon, root.path());
    let b = bundle("news");

    let tamper = async {
        // wait for the registry step to finish, then pull the record away
        while !registry
            .get_deployment_by_slug("news")
            .await
            .unwrap()
            .is_some_and(|r| r.trigger_type.is_some())
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        registry
            .execute_sql("DELETE FROM deployments WHERE slug = 'news'")
            .await
            .unwrap();
    };
    let (deployed, _) = tokio::join!(orch.deploy(&b), tamper);

    let record = deployed.unwrap();
    assert_eq!(record.status, DeploymentStatus::Deployed);
    assert_eq!(record.trigger_type.as_deref(), Some("cron"));
    assert!(record.path_config["agentsDir"].is_string());
    assert!(daemon.has_process("fleet-news"));
    assert_eq!(daemon.calls(), vec!["start:fleet-news"]);
    assert!(DeployPaths::for_slug(root.path(), "news").agents_dir.exists());
}

#[tokio::test(start_paused = true)]
async fn undeploy_archives_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new();
    let (orch, registry) = orchestrator(&daemon, root.path());
    orch.deploy(&bundle("news")).await.unwrap();

    let archived = orch.undeploy("news").await.unwrap();

    assert_eq!(archived.status, DeploymentStatus::Archived);
    assert!(!daemon.has_process("fleet-news"));
    let paths = DeployPaths::for_slug(root.path(), "news");
    assert!(!paths.agents_dir.exists());
    assert!(!paths.integrations_dir.exists());
    assert!(!paths.trigger_file.exists());
    assert!(registry.get_deployment_by_slug("news").await.unwrap().is_none());

    // the slug is free again
    orch.deploy(&bundle("news")).await.unwrap();
    assert!(matches!(
        orch.undeploy("ghost").await.unwrap_err(),
        FleetError::NotFound(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn stop_and_restart_track_record_status() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new();
    let (orch, registry) = orchestrator(&daemon, root.path());
    orch.deploy(&bundle("news")).await.unwrap();

    let stopped = orch.stop("news").await.unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Stopped);

    let status = orch.restart("news").await.unwrap();
    assert_eq!(status.status, ProcessState::Online);
    assert_eq!(
        daemon.restart_options()[0].max_memory_restart.as_deref(),
        Some("256M")
    );
    let rec = registry.require_deployment("news").await.unwrap();
    assert_eq!(rec.status, DeploymentStatus::Deployed);

    let (rec, process) = orch.status("news").await.unwrap();
    assert_eq!(rec.slug, "news");
    assert_eq!(process.map(|p| p.status), Some(ProcessState::Online));
}

#[tokio::test(start_paused = true)]
async fn failed_restart_marks_record_errored() {
    let root = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::new();
    let (orch, registry) = orchestrator(&daemon, root.path());
    orch.deploy(&bundle("news")).await.unwrap();
    let daemon = daemon.script("fleet-news", &[ProcessState::Errored]);

    assert!(orch.restart("news").await.is_err());

    let rec = registry.require_deployment("news").await.unwrap();
    assert_eq!(rec.status, DeploymentStatus::Errored);
    assert!(daemon.calls().contains(&"restart:fleet-news".to_string()));
}

#[test]
fn operational_defaults_without_agent_settings() {
    let mut b = bundle("news");
    b.agents.clear();
    b.process.max_memory_restart = Some("1G".into());
    let cfg = initial_operational_config(&b);
    assert_eq!(cfg, json!({"timeoutMs": 120000, "maxMemoryRestart": "1G"}));
}
