use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::config::{CompletionCriteria, StageSpec};
use super::domain::{
    AutomatedPhaseResult, LoanApplication, StageFailure, StageOutcome, WorkflowId,
};
use super::executor::{StageExecutor, StagePolicy};
use super::stages::{StageInput, StageRegistry};
use super::tracking::{StageUpdate, TrackingError, TrackingStore};

/// Drives the automated phase stage by stage, halting at the first failure. Every planned stage
/// is on the board as pending before the first one runs, so a halted run shows what never ran.
pub struct AutomatedPhaseSequencer<T> {
    registry: Arc<StageRegistry>,
    executor: StageExecutor,
    store: Arc<T>,
}

impl<T> AutomatedPhaseSequencer<T>
where
    T: TrackingStore + 'static,
{
    pub fn new(registry: Arc<StageRegistry>, executor: StageExecutor, store: Arc<T>) -> Self {
        Self {
            registry,
            executor,
            store,
        }
    }

    /// Stage failures are recorded in the result; only tracking-store errors propagate.
    pub async fn run(
        &self,
        workflow_id: &WorkflowId,
        plan: &[StageSpec],
        completion: &CompletionCriteria,
        application: &LoanApplication,
    ) -> Result<AutomatedPhaseResult, TrackingError> {
        let started = Instant::now();
        let mut input = StageInput::new(application.clone());
        let mut errors = Vec::new();
        let mut halted = false;

        for spec in plan {
            self.store
                .update_stage_status(workflow_id, &spec.name, StageUpdate::pending())
                .await?;
        }

        for spec in plan {
            let stage = spec.name.as_str();
            self.store
                .update_stage_status(workflow_id, stage, StageUpdate::running())
                .await?;

            let outcome = match self.registry.get(stage) {
                Some(handler) => {
                    self.executor
                        .execute(
                            workflow_id,
                            stage,
                            handler,
                            input.clone(),
                            StagePolicy::from(spec),
                        )
                        .await
                }
                None => unregistered(stage),
            };

            self.store
                .update_stage_status(workflow_id, stage, StageUpdate::finished(outcome.clone()))
                .await?;

            let success = outcome.success;
            if let Some(failure) = &outcome.failure {
                errors.push(format!("stage {stage} failed: {}", failure.summary()));
            }
            info!(
                %workflow_id,
                stage,
                success,
                attempts = outcome.attempts,
                duration_ms = outcome.duration_ms,
                "stage finished"
            );
            input.prior.push(outcome);

            if !success {
                halted = true;
                break;
            }
        }

        let mut result = AutomatedPhaseResult {
            workflow_id: workflow_id.clone(),
            outcomes: input.prior,
            errors,
            success: false,
            total_duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        let unmet = if halted {
            Vec::new()
        } else {
            unmet_completion_criteria(&result, plan, completion)
        };
        if !unmet.is_empty() {
            warn!(%workflow_id, unmet = ?unmet, "automated phase completion criteria not met");
        }
        result.success = !halted && unmet.is_empty();
        result.errors.extend(unmet);

        Ok(result)
    }
}

fn unregistered(stage: &str) -> StageOutcome {
    StageOutcome {
        stage: stage.to_string(),
        success: false,
        application_id: None,
        report: None,
        failure: Some(StageFailure::UnregisteredStage),
        duration_ms: 0,
        attempts: 0,
        recorded_at: Utc::now(),
    }
}

/// Human-readable list of phase-level criteria the result does not satisfy.
pub fn unmet_completion_criteria(
    result: &AutomatedPhaseResult,
    plan: &[StageSpec],
    completion: &CompletionCriteria,
) -> Vec<String> {
    let mut unmet = Vec::new();

    if completion.require_all_stages {
        for spec in plan {
            let passed = result
                .outcome(&spec.name)
                .map(|outcome| outcome.success)
                .unwrap_or(false);
            if !passed {
                unmet.push(format!("stage {} did not complete successfully", spec.name));
            }
        }
    }

    if let Some(stage) = &completion.approval_stage {
        let approved = result
            .report(stage)
            .and_then(|report| report.approved)
            .unwrap_or(false);
        if !approved {
            unmet.push(format!("stage {stage} did not report explicit approval"));
        }
    }

    if completion.reject_manual_review {
        for outcome in &result.outcomes {
            if outcome
                .signals()
                .map(|signals| signals.requires_manual_review)
                .unwrap_or(false)
            {
                unmet.push(format!("stage {} requested manual review", outcome.stage));
            }
        }
    }

    unmet
}
