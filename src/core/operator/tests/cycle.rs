use std::io::Write;

use serde_json::json;

use super::{FakeOracle, default_config, deployment, fleet};
use crate::core::operator::DiagnosisKind;
use crate::core::registry::{DeploymentStatus, ExecutionStatus, ExecutionSummary};
use crate::core::supervisor::ProcessState;
use crate::core::supervisor::testing::FakeDaemon;

#[tokio::test(start_paused = true)]
async fn rate_limit_adds_fallback_model_and_restarts() {
    let f = fleet(
        FakeDaemon::new().with_process("fleet-news", ProcessState::Errored),
        FakeOracle::answering(DiagnosisKind::RateLimit),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.inspected, 1);
    assert!(report.errors.is_empty());
    assert_eq!(report.actions.len(), 1);
    let action = &report.actions[0];
    assert_eq!(action.action_type, "add_fallback_model");
    assert!(action.auto_applied);
    assert_eq!(action.approved, None);

    let record = f.registry.require_deployment("news").await.unwrap();
    assert_eq!(record.operational_config["fallbackModel"], "gpt-4o-mini");
    assert_eq!(record.operational_config["rateLimitMitigation"], true);
    assert_eq!(record.operational_config["timeoutMs"], 120000);
    assert_eq!(record.status, DeploymentStatus::Deployed);
    assert!(f.daemon.calls().contains(&"restart:fleet-news".to_string()));
}

#[tokio::test(start_paused = true)]
async fn timeout_doubles_operational_timeout() {
    let f = fleet(
        FakeDaemon::new().with_process("fleet-news", ProcessState::Errored),
        FakeOracle::answering(DiagnosisKind::Timeout),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.actions[0].action_type, "increase_timeout");
    assert_eq!(report.actions[0].before_state, json!({"timeoutMs": 120000}));
    let record = f.registry.require_deployment("news").await.unwrap();
    assert_eq!(record.operational_config["timeoutMs"], 240000);
}

#[tokio::test(start_paused = true)]
async fn oom_doubles_memory_limit() {
    let f = fleet(
        FakeDaemon::new().with_process("fleet-news", ProcessState::Stopped),
        FakeOracle::answering(DiagnosisKind::Oom),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.actions[0].action_type, "increase_memory");
    let record = f.registry.require_deployment("news").await.unwrap();
    assert_eq!(record.operational_config["maxMemoryRestart"], "512M");
    // the new limit reaches the daemon with the restart
    let options = f.daemon.restart_options();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].max_memory_restart.as_deref(), Some("512M"));
}

#[tokio::test]
async fn stopped_deployments_stay_stopped() {
    let f = fleet(
        FakeDaemon::new().with_process("fleet-news", ProcessState::Stopped),
        FakeOracle::answering(DiagnosisKind::Unknown),
    );
    let record = deployment(&f.registry, "news", default_config()).await;
    f.registry
        .update_deployment_status(&record.id, DeploymentStatus::Stopped)
        .await
        .unwrap();

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.inspected, 1);
    assert_eq!(report.skipped_stopped, 1);
    assert!(report.actions.is_empty());
    assert!(f.oracle.seen().is_empty());
    assert_eq!(f.daemon.calls(), vec!["list:*"]);
    let record = f.registry.require_deployment("news").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn malformed_config_is_flagged_but_still_restarted() {
    let f = fleet(
        FakeDaemon::new().with_process("fleet-news", ProcessState::Errored),
        FakeOracle::answering(DiagnosisKind::MalformedConfig),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    let action = &report.actions[0];
    assert_eq!(action.action_type, "flag_malformed_config");
    assert!(!action.auto_applied);
    assert_eq!(action.approved, None);
    let record = f.registry.require_deployment("news").await.unwrap();
    assert_eq!(record.operational_config, default_config());
    assert!(f.daemon.calls().contains(&"restart:fleet-news".to_string()));
}

#[tokio::test(start_paused = true)]
async fn orphan_processes_are_skipped_without_diagnosis() {
    let f = fleet(
        FakeDaemon::new()
            .with_process("fleet-ghost", ProcessState::Errored)
            .with_process("fleet-news", ProcessState::Errored),
        FakeOracle::answering(DiagnosisKind::Timeout),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.inspected, 2);
    assert_eq!(report.skipped_orphans, 1);
    assert_eq!(report.actions.len(), 1);
    let seen: Vec<String> = f.oracle.seen().into_iter().map(|(name, _)| name).collect();
    assert_eq!(seen, vec!["fleet-news".to_string()]);
    assert!(!f.daemon.calls().contains(&"restart:fleet-ghost".to_string()));
}

#[tokio::test]
async fn online_processes_are_left_alone() {
    let f = fleet(
        FakeDaemon::new().with_process("fleet-news", ProcessState::Online),
        FakeOracle::answering(DiagnosisKind::Timeout),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.inspected, 0);
    assert!(report.actions.is_empty());
    assert!(f.oracle.seen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn oracle_failure_degrades_to_unknown() {
    let f = fleet(
        FakeDaemon::new().with_process("fleet-news", ProcessState::Errored),
        FakeOracle::broken(),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.actions[0].action_type, "flag_unknown");
    assert!(report.actions[0].description.contains("model unavailable"));
    assert!(report.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_restart_is_reported_and_still_audited() {
    let f = fleet(
        FakeDaemon::new()
            .with_process("fleet-news", ProcessState::Errored)
            .failing("restart"),
        FakeOracle::answering(DiagnosisKind::Timeout),
    );
    deployment(&f.registry, "news", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].process, "fleet-news");
    let record = f.registry.require_deployment("news").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Errored);
    assert_eq!(record.operational_config["timeoutMs"], 240000);
}

#[tokio::test(start_paused = true)]
async fn one_bad_process_does_not_stop_the_cycle() {
    let f = fleet(
        FakeDaemon::new()
            .with_process("fleet-a", ProcessState::Errored)
            .with_process("fleet-b", ProcessState::Errored)
            .failing("restart"),
        FakeOracle::answering(DiagnosisKind::Unknown),
    );
    deployment(&f.registry, "a", default_config()).await;
    deployment(&f.registry, "b", default_config()).await;

    let report = f.operator.run_cycle().await.unwrap();

    assert_eq!(report.actions.len(), 2);
    assert_eq!(report.errors.len(), 2);
}

#[tokio::test]
async fn unreachable_daemon_fails_the_cycle() {
    let f = fleet(
        FakeDaemon::new().failing("connect"),
        FakeOracle::answering(DiagnosisKind::Unknown),
    );
    assert!(f.operator.run_cycle().await.is_err());
}

#[tokio::test]
async fn error_window_has_failed_runs_and_log_tail() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("fleet-news-error.log");
    let mut file = std::fs::File::create(&log).unwrap();
    for i in 0..100 {
        writeln!(file, "line {}", i).unwrap();
    }
    drop(file);

    let f = fleet(
        FakeDaemon::new()
            .with_process("fleet-news", ProcessState::Errored)
            .with_error_log("fleet-news", &log),
        FakeOracle::answering(DiagnosisKind::MalformedConfig),
    );
    let record = deployment(&f.registry, "news", default_config()).await;
    let run = f.registry.start_execution(&record.id, "cron", 3).await.unwrap();
    f.registry
        .finish_execution(
            &run,
            ExecutionStatus::Failed,
            &ExecutionSummary {
                error_message: Some("Research: agent exploded".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    f.operator.run_cycle().await.unwrap();

    let (_, window) = &f.oracle.seen()[0];
    assert!(window.starts_with("Research: agent exploded"));
    assert!(window.contains("line 50"));
    assert!(window.contains("line 99"));
    assert!(!window.contains("line 49\n"));
}

#[tokio::test]
async fn error_window_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("err.log");
    std::fs::write(&log, format!("{}\n", "x".repeat(10_000))).unwrap();

    let f = fleet(
        FakeDaemon::new()
            .with_process("fleet-news", ProcessState::Errored)
            .with_error_log("fleet-news", &log),
        FakeOracle::answering(DiagnosisKind::MalformedConfig),
    );
    deployment(&f.registry, "news", default_config()).await;

    f.operator.run_cycle().await.unwrap();

    assert_eq!(f.oracle.seen()[0].1.chars().count(), 4_000);
}
