use serde_json::json;

use super::{new_deployment, registry};
use crate::core::error::FleetError;
use crate::core::registry::{DeploymentStatus, ExecutionStatus, ExecutionSummary};

#[tokio::test]
async fn insert_then_lookup_by_slug_and_process_name() {
    let reg = registry();
    let rec = reg.insert_deployment(&new_deployment("news")).await.unwrap();

    assert_eq!(rec.status, DeploymentStatus::Deployed);
    assert_eq!(rec.operational_config["maxMemoryRestart"], "256M");

    let by_slug = reg.get_deployment_by_slug("news").await.unwrap().unwrap();
    assert_eq!(by_slug.id, rec.id);
    let by_proc = reg.find_by_process_name("fleet-news").await.unwrap().unwrap();
    assert_eq!(by_proc.id, rec.id);
    assert!(reg.find_by_process_name("fleet-other").await.unwrap().is_none());
}

#[tokio::test]
async fn live_slug_is_unique() {
    let reg = registry();
    reg.insert_deployment(&new_deployment("news")).await.unwrap();
    let err = reg
        .insert_deployment(&new_deployment("news"))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Conflict(_)), "{:?}", err);
}

#[tokio::test]
async fn errored_record_still_holds_its_slug() {
    let reg = registry();
    let rec = reg.insert_deployment(&new_deployment("news")).await.unwrap();
    reg.update_deployment_status(&rec.id, DeploymentStatus::Errored)
        .await
        .unwrap();
    assert!(reg.insert_deployment(&new_deployment("news")).await.is_err());
}

#[tokio::test]
async fn archived_records_disappear_and_free_the_slug() {
    let reg = registry();
    let rec = reg.insert_deployment(&new_deployment("news")).await.unwrap();
    reg.update_deployment_status(&rec.id, DeploymentStatus::Archived)
        .await
        .unwrap();

    assert!(reg.get_deployment_by_slug("news").await.unwrap().is_none());
    assert!(reg.get_deployment(&rec.id).await.unwrap().is_none());
    assert!(reg.list_deployments().await.unwrap().is_empty());

    let err = reg
        .update_deployment_status(&rec.id, DeploymentStatus::Deployed)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::NotFound(_)));

    let again = reg.insert_deployment(&new_deployment("news")).await.unwrap();
    assert_ne!(again.id, rec.id);
}

#[tokio::test]
async fn live_states_cycle() {
    let reg = registry();
    let rec = reg.insert_deployment(&new_deployment("news")).await.unwrap();
    for next in [
        DeploymentStatus::Stopped,
        DeploymentStatus::Errored,
        DeploymentStatus::Deployed,
        DeploymentStatus::Stopped,
    ] {
        reg.update_deployment_status(&rec.id, next).await.unwrap();
    }
    let rec = reg.require_deployment("news").await.unwrap();
    assert_eq!(rec.status, DeploymentStatus::Stopped);
}

#[test]
fn archived_is_terminal() {
    assert!(!DeploymentStatus::Archived.can_transition(DeploymentStatus::Deployed));
    assert!(!DeploymentStatus::Archived.can_transition(DeploymentStatus::Archived));
    assert!(DeploymentStatus::Errored.can_transition(DeploymentStatus::Archived));
    assert!(DeploymentStatus::Stopped.can_transition(DeploymentStatus::Deployed));
}

#[tokio::test]
async fn trigger_and_operational_config_updates() {
    let reg = registry();
    let rec = reg.insert_deployment(&new_deployment("news")).await.unwrap();
    reg.set_deployment_trigger(
        &rec.id,
        "cron",
        &json!({"type": "cron", "expression": "0 2 * * *"}),
        &json!({"agentsDir": "/srv/agents/news"}),
    )
    .await
    .unwrap();
    reg.update_operational_config(&rec.id, &json!({"timeoutMs": 240000}))
        .await
        .unwrap();

    let rec = reg.require_deployment("news").await.unwrap();
    assert_eq!(rec.trigger_type.as_deref(), Some("cron"));
    assert_eq!(rec.trigger_config["expression"], "0 2 * * *");
    assert_eq!(rec.path_config["agentsDir"], "/srv/agents/news");
    assert_eq!(rec.operational_config, json!({"timeoutMs": 240000}));

    let err = reg
        .update_operational_config(&rec.id, &json!([1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Validation(_)));
}

#[tokio::test]
async fn require_deployment_reports_not_found() {
    let err = registry().require_deployment("ghost").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn execution_log_lifecycle_and_error_window() {
    let reg = registry();
    let rec = reg.insert_deployment(&new_deployment("news")).await.unwrap();

    let ok = reg.start_execution(&rec.id, "api", 3).await.unwrap();
    reg.finish_execution(
        &ok,
        ExecutionStatus::Success,
        &ExecutionSummary {
            phases_completed: 3,
            tokens: 1200,
            cost_usd: 0.02,
            duration_ms: 900,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    for n in 0..7 {
        let id = reg.start_execution(&rec.id, "cron", 2).await.unwrap();
        reg.finish_execution(
            &id,
            ExecutionStatus::Failed,
            &ExecutionSummary {
                phases_failed: 2,
                error_message: Some(format!("boom {}", n)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    let runs = reg.list_executions(&rec.id, 20).await.unwrap();
    assert_eq!(runs.len(), 8);
    assert!(runs.iter().any(|r| r.status == ExecutionStatus::Success && r.tokens == 1200));

    let errors = reg.recent_execution_errors(&rec.id, 5).await.unwrap();
    assert_eq!(errors.len(), 5);
    assert_eq!(errors[0], "boom 6");
    assert_eq!(errors[4], "boom 2");
}
