use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use super::assignment::{
    derive_criteria, Assignment, AssignmentEngine, AssignmentOutcome, AssignmentPolicy,
    AssignmentStatus,
};
use super::config::OrchestratorConfig;
use super::domain::{
    AutomatedPhaseResult, LoanApplication, RunStatus, WorkflowId, WorkflowPhase, WorkflowRun,
};
use super::executor::StageExecutor;
use super::sequencer::AutomatedPhaseSequencer;
use super::stages::StageRegistry;
use super::tracking::{RunUpdate, TrackingError, TrackingStore, WorkflowRecord};
use super::transition::{TransitionEvaluator, TransitionVerdict};

static WORKFLOW_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_workflow_id() -> WorkflowId {
    let id = WORKFLOW_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    WorkflowId(format!("wf-{id:06}"))
}

/// Everything a caller learns from driving one workflow through the automated phase.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    pub phase: WorkflowPhase,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub automated: AutomatedPhaseResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentOutcome>,
}

/// Error raised by the orchestration service.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error("stage plan is empty")]
    EmptyPlan,
    #[error("no handler registered for stage(s): {}", .0.join(", "))]
    UnknownStages(Vec<String>),
    #[error("workflow {0} not found")]
    NotFound(WorkflowId),
    #[error("workflow {workflow_id} is {found}, expected {expected}")]
    InvalidState {
        workflow_id: WorkflowId,
        expected: &'static str,
        found: String,
    },
    #[error("workflow {0} has no active assignment")]
    NoActiveAssignment(WorkflowId),
}

/// Facade composing the sequencer, transition gate and assignment engine over one store.
pub struct OriginationService<T> {
    registry: Arc<StageRegistry>,
    store: Arc<T>,
    sequencer: AutomatedPhaseSequencer<T>,
    engine: AssignmentEngine<T>,
    config: RwLock<Arc<OrchestratorConfig>>,
}

impl<T> OriginationService<T>
where
    T: TrackingStore + 'static,
{
    pub fn new(
        registry: StageRegistry,
        store: Arc<T>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestrationError> {
        Self::with_executor(registry, store, config, StageExecutor::default())
    }

    pub fn with_executor(
        registry: StageRegistry,
        store: Arc<T>,
        config: OrchestratorConfig,
        executor: StageExecutor,
    ) -> Result<Self, OrchestrationError> {
        validate_plan(&registry, &config)?;

        let registry = Arc::new(registry);
        let sequencer =
            AutomatedPhaseSequencer::new(Arc::clone(&registry), executor, Arc::clone(&store));
        let engine = AssignmentEngine::new(Arc::clone(&store));

        Ok(Self {
            registry,
            store,
            sequencer,
            engine,
            config: RwLock::new(Arc::new(config)),
        })
    }

    /// Snapshot used by the next run. Runs already in flight keep the snapshot they started with.
    pub fn config(&self) -> Arc<OrchestratorConfig> {
        match self.config.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn update_config(&self, config: OrchestratorConfig) -> Result<(), OrchestrationError> {
        validate_plan(&self.registry, &config)?;
        let next = Arc::new(config);
        match self.config.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }

    pub fn store(&self) -> &Arc<T> {
        &self.store
    }

    /// Create the workflow record without running it.
    pub async fn submit(
        &self,
        application: LoanApplication,
    ) -> Result<WorkflowRun, OrchestrationError> {
        let run = WorkflowRun::new(next_workflow_id(), application);
        let stored = self.store.create_run(run).await?;
        info!(workflow_id = %stored.id, "workflow created");
        Ok(stored)
    }

    /// Create and drive a workflow to the end of the automated phase.
    pub async fn process(
        &self,
        application: LoanApplication,
    ) -> Result<WorkflowReport, OrchestrationError> {
        let run = self.submit(application).await?;
        let span = info_span!("workflow", workflow_id = %run.id);
        self.drive(run).instrument(span).await
    }

    /// Create a workflow and continue it as an independent task.
    pub async fn spawn(
        self: &Arc<Self>,
        application: LoanApplication,
    ) -> Result<(WorkflowRun, JoinHandle<Result<WorkflowReport, OrchestrationError>>), OrchestrationError>
    {
        let run = self.submit(application).await?;
        let service = Arc::clone(self);
        let span = info_span!("workflow", workflow_id = %run.id);
        let pending = run.clone();
        let handle = tokio::spawn(async move { service.drive(pending).await }.instrument(span));
        Ok((run, handle))
    }

    /// Re-drive a run that is still in the automated phase, e.g. after a restart. Stage handlers
    /// are expected to be idempotent.
    pub async fn resume(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowReport, OrchestrationError> {
        let record = self.status(workflow_id).await?;
        if record.run.phase != WorkflowPhase::Automated
            || record.run.status != RunStatus::InProgress
        {
            return Err(OrchestrationError::InvalidState {
                workflow_id: workflow_id.clone(),
                expected: "automated/in_progress",
                found: format!("{}/{}", record.run.phase.label(), record.run.status.label()),
            });
        }
        let span = info_span!("workflow", workflow_id = %workflow_id);
        self.drive(record.run).instrument(span).await
    }

    pub async fn status(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowRecord, OrchestrationError> {
        self.store
            .fetch_run(workflow_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(workflow_id.clone()))
    }

    pub async fn start_manual_review(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Assignment, OrchestrationError> {
        self.require_manual(workflow_id).await?;
        let assignment = self
            .store
            .update_assignment_status(workflow_id, AssignmentStatus::InProgress)
            .await
            .map_err(|err| no_assignment(err, workflow_id))?;
        info!(%workflow_id, employee_id = %assignment.employee_id, "manual review started");
        Ok(assignment)
    }

    pub async fn complete_manual_review(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Assignment, OrchestrationError> {
        self.require_manual(workflow_id).await?;
        let assignment = self
            .store
            .update_assignment_status(workflow_id, AssignmentStatus::Completed)
            .await
            .map_err(|err| no_assignment(err, workflow_id))?;
        self.store
            .update_run_status(
                workflow_id,
                RunUpdate::status(RunStatus::Completed).with_reason("manual phase completed"),
            )
            .await?;
        info!(%workflow_id, employee_id = %assignment.employee_id, "manual review completed");
        Ok(assignment)
    }

    /// Move the open assignment to a different employee with the same criteria. When no one
    /// else can take it the current owner keeps the work and the run records why.
    pub async fn reassign(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<AssignmentOutcome, OrchestrationError> {
        self.require_manual(workflow_id).await?;
        let current = self
            .store
            .active_assignment(workflow_id)
            .await?
            .ok_or_else(|| OrchestrationError::NoActiveAssignment(workflow_id.clone()))?;

        let config = self.config();
        let outcome = self
            .engine
            .reassign(&current, assignment_policy(&config))
            .await?;

        match &outcome {
            AssignmentOutcome::Assigned(next) => {
                info!(
                    %workflow_id,
                    from = %current.employee_id,
                    to = %next.employee_id,
                    "manual review reassigned"
                );
            }
            AssignmentOutcome::Uncommitted { warning, .. } => {
                let update = RunUpdate::status(RunStatus::InProgress).with_reason(warning.clone());
                if let Err(err) = self.store.update_run_status(workflow_id, update).await {
                    warn!(%workflow_id, error = %err, "reconciliation note not recorded");
                }
            }
            AssignmentOutcome::Failed(failure) => {
                warn!(
                    %workflow_id,
                    employee_id = %current.employee_id,
                    reason = failure.reason.code(),
                    "reassignment not possible, current owner retained"
                );
                self.store
                    .update_run_status(
                        workflow_id,
                        RunUpdate::status(RunStatus::InProgress).with_reason(format!(
                            "reassignment pending: {}: {}",
                            failure.reason.code(),
                            failure.detail
                        )),
                    )
                    .await?;
            }
        }

        Ok(outcome)
    }

    async fn require_manual(&self, workflow_id: &WorkflowId) -> Result<(), OrchestrationError> {
        let record = self.status(workflow_id).await?;
        if record.run.phase != WorkflowPhase::Manual || record.run.status.is_terminal() {
            return Err(OrchestrationError::InvalidState {
                workflow_id: workflow_id.clone(),
                expected: "manual/in_progress",
                found: format!("{}/{}", record.run.phase.label(), record.run.status.label()),
            });
        }
        Ok(())
    }

    async fn drive(&self, run: WorkflowRun) -> Result<WorkflowReport, OrchestrationError> {
        let config = self.config();
        match self.drive_with(&run, &config).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(workflow_id = %run.id, error = %err, "tracking store failure, aborting run");
                let update = RunUpdate::status(RunStatus::Error).with_reason(err.to_string());
                if let Err(secondary) = self.store.update_run_status(&run.id, update).await {
                    warn!(workflow_id = %run.id, error = %secondary, "could not record error status");
                }
                Err(err.into())
            }
        }
    }

    async fn drive_with(
        &self,
        run: &WorkflowRun,
        config: &OrchestratorConfig,
    ) -> Result<WorkflowReport, TrackingError> {
        let automated = self
            .sequencer
            .run(&run.id, &config.stages, &config.completion, &run.application)
            .await?;

        if !automated.success {
            let reason = automated.summary();
            self.store
                .update_run_status(
                    &run.id,
                    RunUpdate::status(RunStatus::Failed).with_reason(reason.clone()),
                )
                .await?;
            info!(workflow_id = %run.id, %reason, "automated phase failed");
            return Ok(WorkflowReport {
                workflow_id: run.id.clone(),
                phase: WorkflowPhase::Automated,
                status: RunStatus::Failed,
                reason: Some(reason),
                automated,
                transition: None,
                assignment: None,
            });
        }

        let verdict = TransitionEvaluator::new(config.transition.clone()).evaluate(&automated);
        if !verdict.qualifies() {
            let reason = verdict.reason();
            self.store
                .update_run_status(
                    &run.id,
                    RunUpdate::status(RunStatus::Failed).with_reason(reason.clone()),
                )
                .await?;
            info!(workflow_id = %run.id, %reason, "manual phase transition denied");
            return Ok(WorkflowReport {
                workflow_id: run.id.clone(),
                phase: WorkflowPhase::Automated,
                status: RunStatus::Failed,
                reason: Some(reason),
                automated,
                transition: Some(verdict),
                assignment: None,
            });
        }

        let criteria = derive_criteria(&automated, &run.application, &config.criteria);
        let outcome = self
            .engine
            .assign(
                &run.id,
                automated.application_id(),
                &criteria,
                assignment_policy(config),
            )
            .await?;

        let (phase, reason) = match &outcome {
            AssignmentOutcome::Assigned(_) => (WorkflowPhase::Manual, None),
            AssignmentOutcome::Uncommitted { warning, .. } => {
                let update = RunUpdate::status(RunStatus::InProgress).with_reason(warning.clone());
                if let Err(err) = self.store.update_run_status(&run.id, update).await {
                    warn!(workflow_id = %run.id, error = %err, "reconciliation note not recorded");
                }
                (WorkflowPhase::Automated, Some(warning.clone()))
            }
            AssignmentOutcome::Failed(failure) => {
                let reason = format!(
                    "assignment pending: {}: {}",
                    failure.reason.code(),
                    failure.detail
                );
                self.store
                    .update_run_status(
                        &run.id,
                        RunUpdate::status(RunStatus::InProgress).with_reason(reason.clone()),
                    )
                    .await?;
                (WorkflowPhase::Automated, Some(reason))
            }
        };

        Ok(WorkflowReport {
            workflow_id: run.id.clone(),
            phase,
            status: RunStatus::InProgress,
            reason,
            automated,
            transition: Some(verdict),
            assignment: Some(outcome),
        })
    }
}

fn assignment_policy(config: &OrchestratorConfig) -> AssignmentPolicy<'_> {
    AssignmentPolicy {
        roles: &config.roles,
        weights: &config.scoring,
        max_commit_attempts: config.max_commit_attempts,
    }
}

fn validate_plan(
    registry: &StageRegistry,
    config: &OrchestratorConfig,
) -> Result<(), OrchestrationError> {
    if config.stages.is_empty() {
        return Err(OrchestrationError::EmptyPlan);
    }
    let missing = registry.missing(config.stage_names());
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrchestrationError::UnknownStages(missing))
    }
}

fn no_assignment(err: TrackingError, workflow_id: &WorkflowId) -> OrchestrationError {
    match err {
        TrackingError::NotFound => OrchestrationError::NoActiveAssignment(workflow_id.clone()),
        other => OrchestrationError::Tracking(other),
    }
}
