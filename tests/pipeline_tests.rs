//! Integration tests for event processing: steps, entity updates, realtime
//! rules and notification dispatch.

use anyhow::Result;
use chrono::Utc;
use fulfillment_monitor::models::step;
use fulfillment_monitor::normalization::EventType;
use fulfillment_monitor::repositories::{
    ActivityLogRepository, ConsolidationTransition, EventRepository, NotificationRepository,
    ProjectRepository, StepRepository,
};
use fulfillment_monitor::steps::{StepService, StepUpsert};
use fulfillment_monitor::transports::ChannelSink;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    RecordingEmail, TestPipeline, build_pipeline, build_pipeline_with_email, create_rule,
    erp_event, oms_event, setup_test_db, test_config, tms_event, wfm_event,
};

async fn ingest_and_process(harness: &TestPipeline, source: &str, raw: Value) -> Result<Uuid> {
    let outcome = harness.pipeline.ingestion.ingest_raw(source, &raw).await?;
    let event_id = outcome.event_id.expect("event id");
    harness.pipeline.process_now(event_id).await?;
    Ok(event_id)
}

fn step_of<'a>(steps: &'a [step::Model], step_type: &str) -> &'a step::Model {
    steps
        .iter()
        .find(|step| step.step_type == step_type)
        .unwrap_or_else(|| panic!("missing step {step_type}"))
}

#[tokio::test]
async fn order_events_advance_order_and_steps() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline(&db, &test_config());

    let confirmed = ingest_and_process(
        &harness,
        "erp",
        erp_event(
            "ERP-10",
            "order.confirmed",
            "P-1",
            "O-1",
            json!({"promised_delivery_date": "2026-03-20"}),
        ),
    )
    .await?;
    let shortage = ingest_and_process(
        &harness,
        "erp",
        erp_event(
            "ERP-11",
            "stock.shortage",
            "P-1",
            "O-1",
            json!({"items": [{"sku": "CAB-60", "quantity": 2}]}),
        ),
    )
    .await?;

    let projects = ProjectRepository::new(db.clone());
    let project = projects.find_by_reference("P-1").await?.expect("project");
    let order = projects
        .find_order_by_reference(project.id, "O-1")
        .await?
        .expect("order");
    assert_eq!(order.status, "stock_shortage");
    assert!(order.promised_delivery_at.is_some());
    assert!(order.confirmed_at.is_some());

    let steps = StepRepository::new(db.clone()).for_owners(&[order.id]).await?;
    let confirmed_step = step_of(&steps, "order_confirmed");
    assert_eq!(confirmed_step.scope, "order");
    assert_eq!(confirmed_step.status, "completed");
    assert!(confirmed_step.completed_at.is_some());
    assert_eq!(
        confirmed_step.expected_at.map(|at| at.to_rfc3339()),
        Some("2026-03-20T00:00:00+00:00".to_string())
    );
    assert_eq!(confirmed_step.order_id, Some(order.id));
    assert!(confirmed_step.project_id.is_none());
    assert_eq!(confirmed_step.event_id_list(), vec![confirmed]);

    let stock_step = step_of(&steps, "stock_check");
    assert_eq!(stock_step.status, "anomaly");
    assert_eq!(stock_step.event_id_list(), vec![shortage]);

    let events = EventRepository::new(db.clone());
    assert!(events.find_by_id(confirmed).await?.unwrap().processed_at.is_some());
    assert!(events.find_by_id(shortage).await?.unwrap().processed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn stock_ok_does_not_regress_dispatched_order() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline(&db, &test_config());

    ingest_and_process(
        &harness,
        "oms",
        oms_event(
            "OMS-1",
            "shipment.dispatched",
            "P-2",
            "O-1",
            json!({"carrier": "DHL", "tracking_no": "TRK-1"}),
        ),
    )
    .await?;
    ingest_and_process(
        &harness,
        "erp",
        erp_event("ERP-20", "stock.ok", "P-2", "O-1", json!({})),
    )
    .await?;

    let projects = ProjectRepository::new(db.clone());
    let project = projects.find_by_reference("P-2").await?.expect("project");
    let order = projects
        .find_order_by_reference(project.id, "O-1")
        .await?
        .expect("order");
    assert_eq!(order.status, "dispatched");
    assert_eq!(order.carrier.as_deref(), Some("DHL"));
    assert_eq!(order.tracking_ref.as_deref(), Some("TRK-1"));
    Ok(())
}

#[tokio::test]
async fn consolidation_completes_when_every_order_arrives() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline(&db, &test_config());

    for (doc, order) in [("ERP-30", "O-1"), ("ERP-31", "O-2")] {
        ingest_and_process(
            &harness,
            "erp",
            erp_event(
                doc,
                "order.confirmed",
                "P-3",
                order,
                json!({"promised_delivery_date": "2026-03-20"}),
            ),
        )
        .await?;
    }

    let projects = ProjectRepository::new(db.clone());
    let project = projects.find_by_reference("P-3").await?.expect("project");

    ingest_and_process(
        &harness,
        "oms",
        oms_event(
            "OMS-30",
            "shipment.arrived_station",
            "P-3",
            "O-1",
            json!({"station": "HUB-1"}),
        ),
    )
    .await?;
    let consolidation = projects
        .find_consolidation(project.id)
        .await?
        .expect("consolidation");
    assert_eq!(consolidation.status, "partial");
    assert_eq!(consolidation.orders_required, 2);
    assert_eq!(consolidation.orders_arrived, 1);

    ingest_and_process(
        &harness,
        "oms",
        oms_event(
            "OMS-31",
            "shipment.arrived_station",
            "P-3",
            "O-2",
            json!({"station": "HUB-1"}),
        ),
    )
    .await?;
    let consolidation = projects
        .find_consolidation(project.id)
        .await?
        .expect("consolidation");
    assert_eq!(consolidation.status, "complete");
    assert!(consolidation.completed_at.is_some());

    let last_mile = projects.find_last_mile(project.id).await?.expect("last mile");
    assert_eq!(last_mile.status, "ready_to_schedule");

    let actions: Vec<String> = ActivityLogRepository::new(db.clone())
        .for_project(project.id)
        .await?
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert!(actions.contains(&"consolidation.status_changed".to_string()));
    Ok(())
}

#[tokio::test]
async fn installation_completion_completes_project() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline(&db, &test_config());

    ingest_and_process(
        &harness,
        "wfm",
        wfm_event(
            "WFM-40",
            "installation.scheduled",
            "P-4",
            json!({"scheduled_at": "2026-03-25T08:00:00Z"}),
        ),
    )
    .await?;
    ingest_and_process(
        &harness,
        "wfm",
        wfm_event("WFM-41", "installation.completed", "P-4", json!({})),
    )
    .await?;
    // Late "started" must not reopen a completed installation
    ingest_and_process(
        &harness,
        "wfm",
        wfm_event("WFM-42", "installation.started", "P-4", json!({})),
    )
    .await?;

    let projects = ProjectRepository::new(db.clone());
    let project = projects.find_by_reference("P-4").await?.expect("project");
    assert_eq!(project.status, "completed");

    let installation = projects
        .find_installation(project.id)
        .await?
        .expect("installation");
    assert_eq!(installation.status, "completed");
    assert!(installation.scheduled_at.is_some());

    let steps = StepRepository::new(db.clone())
        .for_owners(&[installation.id])
        .await?;
    let step = step_of(&steps, "installation");
    assert_eq!(step.scope, "installation");
    assert!(step.completed_at.is_some());
    assert_eq!(step.event_id_list().len(), 3);
    Ok(())
}

#[tokio::test]
async fn last_mile_scheduling_records_external_reference() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline(&db, &test_config());

    ingest_and_process(
        &harness,
        "tms",
        tms_event(
            "TMS-50",
            "lastmile.scheduled",
            "P-5",
            json!({"lastmile_id": "LM-9", "scheduled_date": "2026-03-22"}),
        ),
    )
    .await?;

    let projects = ProjectRepository::new(db.clone());
    let project = projects.find_by_reference("P-5").await?.expect("project");
    let last_mile = projects.find_last_mile(project.id).await?.expect("last mile");
    assert_eq!(last_mile.status, "scheduled");
    assert_eq!(last_mile.external_ref.as_deref(), Some("LM-9"));
    assert!(last_mile.scheduled_date.is_some());

    // Without an installation the last-mile step has no owner
    let steps = StepRepository::new(db.clone())
        .for_owners(&[project.id])
        .await?;
    assert!(steps.iter().all(|step| step.step_type != "last_mile"));
    assert!(projects.find_installation(project.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn completed_at_is_stamped_once_and_kept_on_anomaly() -> Result<()> {
    let db = setup_test_db().await?;
    let projects = ProjectRepository::new(db.clone());
    let project = projects.get_or_create("P-8").await?;
    let order = projects.get_or_create_order(project.id, "O-1").await?;
    let steps = StepService::new(db.clone());
    let repository = StepRepository::new(db.clone());

    let upsert = |event_type| StepUpsert {
        event_type,
        project_id: project.id,
        order_id: Some(order.id),
        installation_id: None,
        event_id: Some(Uuid::new_v4()),
        expected_at: None,
    };

    let first_id = steps.upsert_step(upsert(EventType::StockOk)).await?;
    let first = repository
        .find("order", order.id, "stock_check")
        .await?
        .expect("stock check step");
    assert_eq!(first.status, "completed");
    assert!(first.completed_at.is_some());

    sleep(Duration::from_millis(20)).await;
    let second_id = steps.upsert_step(upsert(EventType::StockOk)).await?;
    let second = repository
        .find("order", order.id, "stock_check")
        .await?
        .expect("stock check step");
    assert_eq!(second_id, first_id);
    assert_eq!(second.completed_at, first.completed_at);

    sleep(Duration::from_millis(20)).await;
    steps.upsert_step(upsert(EventType::StockShortage)).await?;
    let third = repository
        .find("order", order.id, "stock_check")
        .await?
        .expect("stock check step");
    assert_eq!(third.status, "anomaly");
    assert_eq!(third.completed_at, first.completed_at);
    assert_eq!(third.event_id_list().len(), 3);
    Ok(())
}

#[tokio::test]
async fn stale_consolidation_recount_cannot_regress_state() -> Result<()> {
    let db = setup_test_db().await?;
    let projects = ProjectRepository::new(db.clone());
    let project = projects.get_or_create("P-11").await?;
    let consolidation = projects.get_or_create_consolidation(project.id).await?;

    projects
        .record_consolidation_counts(consolidation.id, 2, 2)
        .await?;
    let completed = projects
        .transition_consolidation(
            consolidation.id,
            ConsolidationTransition {
                from: &["pending", "partial", "partial_approved"],
                to: "complete",
                completed_at: Some(Utc::now().fixed_offset()),
                approved_by: None,
            },
        )
        .await?;
    assert!(completed);

    // A recount that read the orders before the last arrival
    projects
        .record_consolidation_counts(consolidation.id, 2, 1)
        .await?;
    let regressed = projects
        .transition_consolidation(
            consolidation.id,
            ConsolidationTransition {
                from: &["pending"],
                to: "partial",
                completed_at: None,
                approved_by: None,
            },
        )
        .await?;
    assert!(!regressed);

    let current = projects
        .find_consolidation(project.id)
        .await?
        .expect("consolidation");
    assert_eq!(current.status, "complete");
    assert_eq!(current.orders_arrived, 2);
    assert_eq!(current.orders_required, 2);
    assert!(current.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn step_upsert_without_required_scope_is_skipped() -> Result<()> {
    let db = setup_test_db().await?;
    let project = ProjectRepository::new(db.clone())
        .get_or_create("P-9")
        .await?;

    let step_id = StepService::new(db.clone())
        .upsert_step(StepUpsert {
            event_type: EventType::LastMileScheduled,
            project_id: project.id,
            order_id: None,
            installation_id: None,
            event_id: Some(Uuid::new_v4()),
            expected_at: None,
        })
        .await?;

    assert!(step_id.is_none());
    assert!(
        StepRepository::new(db)
            .for_owners(&[project.id])
            .await?
            .is_empty()
    );
    Ok(())
}

#[tokio::test]
async fn processing_twice_does_not_duplicate_activity() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline(&db, &test_config());

    let event_id = ingest_and_process(
        &harness,
        "erp",
        erp_event("ERP-60", "stock.ok", "P-6", "O-1", json!({})),
    )
    .await?;
    harness.pipeline.process_now(event_id).await?;

    let project = ProjectRepository::new(db.clone())
        .find_by_reference("P-6")
        .await?
        .expect("project");
    let entries = ActivityLogRepository::new(db.clone())
        .for_project(project.id)
        .await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_id, Some(event_id));
    Ok(())
}

#[tokio::test]
async fn realtime_rule_notifies_once_per_event() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline(&db, &test_config());
    let (push_tx, mut push_rx) = tokio::sync::mpsc::unbounded_channel();
    harness
        .push
        .register("dashboard", Arc::new(ChannelSink::new("dashboard", push_tx)));

    let rule = create_rule(
        &db,
        "Stock shortage",
        "order",
        "realtime",
        "critical",
        json!({"type": "equals", "field": "event_type", "value": "stock.shortage"}),
        json!({
            "subject": "[{severity}] {rule_name}: {project_ref}/{order_ref}",
            "create_ticket": true
        }),
    )
    .await?;

    ingest_and_process(
        &harness,
        "erp",
        erp_event(
            "ERP-70",
            "stock.shortage",
            "P-7",
            "O-1",
            json!({"items": [{"sku": "CAB-60"}]}),
        ),
    )
    .await?;
    // A non-matching event fires nothing
    ingest_and_process(
        &harness,
        "erp",
        erp_event("ERP-71", "stock.ok", "P-7", "O-1", json!({})),
    )
    .await?;

    let sent = harness.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
    assert_eq!(sent[0].subject, "[critical] Stock shortage: P-7/O-1");

    let notifications = NotificationRepository::new(db.clone());
    assert_eq!(notifications.count_for_rule(rule.id).await?, 1);

    let tickets = harness.tickets.requests();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].rule_id, rule.id);

    let pushed: Value = serde_json::from_str(push_rx.try_recv()?.trim_end())?;
    assert_eq!(pushed["type"], "notification");
    assert_eq!(pushed["severity"], "critical");
    Ok(())
}

#[tokio::test]
async fn failed_email_marks_notification_delivery_failed() -> Result<()> {
    let db = setup_test_db().await?;
    let harness = build_pipeline_with_email(&db, &test_config(), RecordingEmail::failing());

    let rule = create_rule(
        &db,
        "Installation issue",
        "project",
        "realtime",
        "warning",
        json!({"type": "equals", "field": "installation_status", "value": "issue"}),
        json!({}),
    )
    .await?;

    let event_id = ingest_and_process(
        &harness,
        "wfm",
        wfm_event(
            "WFM-80",
            "installation.issue",
            "P-8",
            json!({"reason": "wall not ready"}),
        ),
    )
    .await?;

    let notification = NotificationRepository::new(db.clone())
        .find_by_dedupe_key(&format!("{}:{}", rule.id, event_id))
        .await?
        .expect("notification recorded despite failed delivery");
    assert_eq!(notification.status, "delivery_failed");
    assert!(notification.sent_at.is_none());
    assert_eq!(harness.email.sent().len(), 1);

    // The event still counts as processed
    let event = EventRepository::new(db.clone())
        .find_by_id(event_id)
        .await?
        .expect("event");
    assert!(event.processed_at.is_some());
    Ok(())
}
