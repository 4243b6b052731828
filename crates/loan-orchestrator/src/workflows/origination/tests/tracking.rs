use chrono::Utc;

use super::common::*;
use crate::workflows::origination::assignment::{AssignmentStatus, EmployeeRole};
use crate::workflows::origination::domain::{EmployeeId, StageOutcome, StageReport, StageStatus};
use crate::workflows::origination::tracking::{
    InMemoryTrackingStore, StageUpdate, TrackingError, TrackingStore,
};

fn id(raw: &str) -> EmployeeId {
    EmployeeId(raw.to_string())
}

#[tokio::test]
async fn replacement_moves_workload_between_employees() {
    let store = InMemoryTrackingStore::with_employees(roster());
    let wf = seed_run(&store, "wf-trk-swap", 100_000).await;
    store
        .record_assignment(assignment(&wf, "lo-1"))
        .await
        .expect("first owner");

    store
        .replace_assignment(assignment(&wf, "slo-1"))
        .await
        .expect("swap commits");

    assert_eq!(store.open_assignments(&id("lo-1")).await, 0);
    assert_eq!(store.open_assignments(&id("slo-1")).await, 1);
    let history = store.assignments().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, AssignmentStatus::Reassigned);
    assert!(history[0].completed_at.is_some());
    let record = store.fetch_run(&wf).await.expect("fetch").expect("present");
    assert_eq!(record.assigned_employee, Some(id("slo-1")));

    store
        .update_assignment_status(&wf, AssignmentStatus::Completed)
        .await
        .expect("completed");
    assert_eq!(store.open_assignments(&id("slo-1")).await, 0);
    assert!(store.active_assignment(&wf).await.expect("read").is_none());
}

#[tokio::test]
async fn rejected_replacement_keeps_current_owner() {
    let store = InMemoryTrackingStore::with_employees(vec![
        employee("lo-1", EmployeeRole::LoanOfficer, &[], 2),
        employee("lo-2", EmployeeRole::LoanOfficer, &[], 1),
    ]);
    let busy = seed_run(&store, "wf-trk-busy", 100_000).await;
    let wf = seed_run(&store, "wf-trk-keep", 100_000).await;
    store
        .record_assignment(assignment(&busy, "lo-2"))
        .await
        .expect("lo-2 now full");
    store
        .record_assignment(assignment(&wf, "lo-1"))
        .await
        .expect("first owner");

    let err = store
        .replace_assignment(assignment(&wf, "lo-2"))
        .await
        .expect_err("target has no headroom");
    assert_eq!(err, TrackingError::CapacityConflict);

    let err = store
        .replace_assignment(assignment(&wf, "lo-1"))
        .await
        .expect_err("same owner is not a reassignment");
    assert_eq!(err, TrackingError::Conflict);

    let current = store.active_assignment(&wf).await.expect("read");
    assert_eq!(current.map(|a| a.employee_id), Some(id("lo-1")));
    assert_eq!(store.open_assignments(&id("lo-1")).await, 1);

    let orphan = seed_run(&store, "wf-trk-orphan", 100_000).await;
    let err = store
        .replace_assignment(assignment(&orphan, "lo-1"))
        .await
        .expect_err("nothing to replace");
    assert_eq!(err, TrackingError::NotFound);
}

#[tokio::test]
async fn stage_reset_drops_the_previous_outcome() {
    let store = InMemoryTrackingStore::default();
    let wf = seed_run(&store, "wf-trk-reset", 100_000).await;
    let outcome = StageOutcome {
        stage: "underwriting".to_string(),
        success: true,
        application_id: None,
        report: Some(StageReport::approval(true)),
        failure: None,
        duration_ms: 4,
        attempts: 1,
        recorded_at: Utc::now(),
    };

    store
        .update_stage_status(&wf, &outcome.stage, StageUpdate::finished(outcome.clone()))
        .await
        .expect("finished");
    store
        .update_stage_status(&wf, &outcome.stage, StageUpdate::pending())
        .await
        .expect("reset");

    let record = store.fetch_run(&wf).await.expect("fetch").expect("present");
    let row = record.stage(&outcome.stage).expect("row kept");
    assert_eq!(row.status, StageStatus::Pending);
    assert!(row.outcome.is_none());
    assert_eq!(record.stages.len(), 1);
}
