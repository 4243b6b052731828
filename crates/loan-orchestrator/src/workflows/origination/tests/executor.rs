use std::sync::Arc;
use std::time::Duration;

use super::common::*;
use crate::workflows::origination::domain::{StageFailure, StageReport};
use crate::workflows::origination::executor::{StageExecutor, StagePolicy};
use crate::workflows::origination::stages::{StageInput, StageResponse};

fn policy(max_attempts: u32) -> StagePolicy {
    StagePolicy::new(
        Duration::from_millis(500),
        max_attempts,
        Duration::from_millis(100),
    )
}

#[tokio::test]
async fn always_failing_handler_is_attempted_exactly_max_attempts() {
    let (executor, sleeper) = recording_executor();
    let stage = ScriptedStage::new(StageResponse::failure("income not verifiable"));

    let outcome = executor
        .execute(
            &workflow_id("wf-exec-1"),
            "underwriting",
            stage.clone(),
            StageInput::new(application(250_000)),
            policy(4),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 4);
    assert_eq!(stage.calls(), 4);
    assert_eq!(
        outcome.failure,
        Some(StageFailure::HandlerFailure("income not verifiable".to_string()))
    );
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300),
        ],
        "backoff grows linearly and never follows the final attempt"
    );
}

#[tokio::test]
async fn flaky_handler_succeeds_on_third_attempt() {
    let (executor, sleeper) = recording_executor();
    let stage = FlakyStage::new(2);

    let outcome = executor
        .execute(
            &workflow_id("wf-exec-2"),
            "loan_application",
            stage.clone(),
            StageInput::new(application(250_000)),
            policy(3),
        )
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(stage.calls(), 3);
    assert_eq!(outcome.report, Some(StageReport::approval(true)));
    assert_eq!(sleeper.delays().len(), 2);
}

#[tokio::test]
async fn zero_max_attempts_still_runs_once() {
    let (executor, _) = recording_executor();
    let stage = ScriptedStage::new(StageResponse::failure("declined"));

    let outcome = executor
        .execute(
            &workflow_id("wf-exec-3"),
            "pre_qualification",
            stage.clone(),
            StageInput::new(application(100_000)),
            policy(0),
        )
        .await;

    assert_eq!(outcome.attempts, 1);
    assert_eq!(stage.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn handler_outliving_timeout_is_recorded_as_timeout() {
    let executor = StageExecutor::default();
    let stage = SlowStage::new(Duration::from_secs(600));

    let outcome = executor
        .execute(
            &workflow_id("wf-exec-4"),
            "credit_decision",
            stage.clone(),
            StageInput::new(application(100_000)),
            StagePolicy::new(Duration::from_millis(50), 2, Duration::from_millis(5)),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(StageFailure::Timeout));
    assert_eq!(outcome.attempts, 2);
    assert_eq!(stage.calls(), 2);
    assert!(outcome.report.is_none());
}

#[tokio::test]
async fn handler_fault_is_wrapped_not_propagated() {
    let (executor, _) = recording_executor();

    let outcome = executor
        .execute(
            &workflow_id("wf-exec-5"),
            "underwriting",
            Arc::new(FaultyStage),
            StageInput::new(application(100_000)),
            policy(2),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.failure,
        Some(StageFailure::HandlerFault(
            "connection reset by bureau".to_string()
        ))
    );
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test]
async fn panicking_handler_becomes_fault() {
    let (executor, _) = recording_executor();

    let outcome = executor
        .execute(
            &workflow_id("wf-exec-6"),
            "quality_check",
            Arc::new(PanickingStage),
            StageInput::new(application(100_000)),
            policy(1),
        )
        .await;

    assert_eq!(
        outcome.failure,
        Some(StageFailure::HandlerFault("handler panicked".to_string()))
    );
}

#[test]
fn backoff_saturates_instead_of_overflowing() {
    let policy = StagePolicy::new(Duration::from_secs(1), 3, Duration::MAX);
    assert_eq!(policy.backoff(2), Duration::MAX);
}
