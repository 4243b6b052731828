use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::assignment::{
    Assignment, AssignmentCriteria, AssignmentStatus, Candidate, Employee, EmployeeStatus,
};
use super::domain::{
    EmployeeId, RunStatus, StageOutcome, StageStatus, WorkflowId, WorkflowPhase, WorkflowRun,
};

/// Upsert payload for a stage row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageUpdate {
    pub status: StageStatus,
    pub outcome: Option<StageOutcome>,
}

impl StageUpdate {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            outcome: None,
        }
    }

    pub fn running() -> Self {
        Self {
            status: StageStatus::Running,
            outcome: None,
        }
    }

    pub fn finished(outcome: StageOutcome) -> Self {
        Self {
            status: outcome.status(),
            outcome: Some(outcome),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub phase: Option<WorkflowPhase>,
    pub reason: Option<String>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status,
            phase: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_phase(mut self, phase: WorkflowPhase) -> Self {
        self.phase = Some(phase);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub status: StageStatus,
    pub outcome: Option<StageOutcome>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the store tracks about one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub run: WorkflowRun,
    pub stages: Vec<StageRecord>,
    pub status_reason: Option<String>,
    pub assigned_employee: Option<EmployeeId>,
}

impl WorkflowRecord {
    pub fn new(run: WorkflowRun) -> Self {
        Self {
            run,
            stages: Vec::new(),
            status_reason: None,
            assigned_employee: None,
        }
    }

    pub fn stage(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.stage == stage)
    }

    pub fn status_view(&self) -> WorkflowStatusView {
        WorkflowStatusView {
            workflow_id: self.run.id.clone(),
            phase: self.run.phase.label(),
            status: self.run.status.label(),
            reason: self.status_reason.clone(),
            assigned_employee: self.assigned_employee.clone(),
            stages: self
                .stages
                .iter()
                .map(|record| StageStatusView {
                    stage: record.stage.clone(),
                    status: record.status.label(),
                    attempts: record.outcome.as_ref().map(|outcome| outcome.attempts),
                    failure: record
                        .outcome
                        .as_ref()
                        .and_then(|outcome| outcome.failure.as_ref())
                        .map(|failure| failure.reason()),
                })
                .collect(),
        }
    }
}

/// Sanitized representation exposed to dashboards and the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatusView {
    pub workflow_id: WorkflowId,
    pub phase: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_employee: Option<EmployeeId>,
    pub stages: Vec<StageStatusView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageStatusView {
    pub stage: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("employee capacity already claimed")]
    CapacityConflict,
    #[error("tracking store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence boundary for workflow, stage and assignment state. Every write must be
/// idempotent under retry.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn create_run(&self, run: WorkflowRun) -> Result<WorkflowRun, TrackingError>;

    /// Upserts the row for `stage`; repeated calls replace, never append. The row's outcome is
    /// replaced too, so a stage reset to pending or running carries no stale result.
    async fn update_stage_status(
        &self,
        id: &WorkflowId,
        stage: &str,
        update: StageUpdate,
    ) -> Result<(), TrackingError>;

    async fn update_run_status(
        &self,
        id: &WorkflowId,
        update: RunUpdate,
    ) -> Result<(), TrackingError>;

    async fn fetch_run(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, TrackingError>;

    /// Active employees with their current open-assignment counts.
    async fn read_employee_candidates(
        &self,
        criteria: &AssignmentCriteria,
    ) -> Result<Vec<Candidate>, TrackingError>;

    /// Conditional commit: fails with [`TrackingError::CapacityConflict`] when the employee has
    /// no headroom and with [`TrackingError::Conflict`] when the workflow already has an open
    /// assignment. On success the run moves to the manual phase in the same write.
    async fn record_assignment(&self, assignment: Assignment) -> Result<Assignment, TrackingError>;

    async fn update_assignment_status(
        &self,
        id: &WorkflowId,
        status: AssignmentStatus,
    ) -> Result<Assignment, TrackingError>;

    /// Closes the workflow's open assignment as reassigned and records `next` in one write.
    /// Fails with [`TrackingError::NotFound`] when there is nothing to replace and with
    /// [`TrackingError::CapacityConflict`] when the new owner has no headroom; either way the
    /// current assignment stays open.
    async fn replace_assignment(&self, next: Assignment) -> Result<Assignment, TrackingError>;

    async fn active_assignment(&self, id: &WorkflowId)
        -> Result<Option<Assignment>, TrackingError>;

    async fn upsert_employee(&self, employee: Employee) -> Result<(), TrackingError>;
}

#[derive(Debug, Default)]
struct StoreState {
    runs: HashMap<WorkflowId, WorkflowRecord>,
    employees: Vec<Employee>,
    /// Every assignment ever recorded, in commit order.
    history: Vec<Assignment>,
    /// Workflow to its open entry in `history`.
    open: HashMap<WorkflowId, usize>,
    workload: HashMap<EmployeeId, u32>,
}

impl StoreState {
    fn open_assignments(&self, employee: &EmployeeId) -> u32 {
        self.workload.get(employee).copied().unwrap_or(0)
    }

    fn open_assignment(&self, id: &WorkflowId) -> Option<&Assignment> {
        self.open.get(id).and_then(|index| self.history.get(*index))
    }

    fn open_assignment_mut(&mut self, id: &WorkflowId) -> Option<&mut Assignment> {
        let index = *self.open.get(id)?;
        self.history.get_mut(index)
    }

    fn run_mut(&mut self, id: &WorkflowId) -> Result<&mut WorkflowRecord, TrackingError> {
        self.runs.get_mut(id).ok_or(TrackingError::NotFound)
    }

    fn ensure_headroom(&self, employee_id: &EmployeeId) -> Result<(), TrackingError> {
        let capacity = self
            .employees
            .iter()
            .find(|employee| &employee.id == employee_id)
            .map(|employee| employee.max_concurrent_assignments)
            .ok_or(TrackingError::NotFound)?;
        if self.open_assignments(employee_id) >= capacity {
            return Err(TrackingError::CapacityConflict);
        }
        Ok(())
    }

    fn open_entry(&mut self, assignment: Assignment) {
        *self
            .workload
            .entry(assignment.employee_id.clone())
            .or_default() += 1;
        self.open
            .insert(assignment.workflow_id.clone(), self.history.len());
        self.history.push(assignment);
    }

    fn close_entry(&mut self, id: &WorkflowId, status: AssignmentStatus) -> Option<Assignment> {
        let index = self.open.remove(id)?;
        let assignment = self.history.get_mut(index)?;
        assignment.status = status;
        assignment.completed_at = Some(Utc::now());
        let closed = assignment.clone();
        if let Some(load) = self.workload.get_mut(&closed.employee_id) {
            *load = load.saturating_sub(1);
        }
        Some(closed)
    }
}

/// Single-lock in-memory store. Every method holds the lock for its whole read-modify-write,
/// which is what makes `record_assignment` atomic with respect to capacity.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    state: Mutex<StoreState>,
}

impl InMemoryTrackingStore {
    pub fn with_employees(employees: impl IntoIterator<Item = Employee>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                employees: employees.into_iter().collect(),
                ..StoreState::default()
            }),
        }
    }

    pub async fn assignments(&self) -> Vec<Assignment> {
        self.state.lock().await.history.clone()
    }

    pub async fn open_assignments(&self, employee: &EmployeeId) -> u32 {
        self.state.lock().await.open_assignments(employee)
    }
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn create_run(&self, run: WorkflowRun) -> Result<WorkflowRun, TrackingError> {
        let mut state = self.state.lock().await;
        if state.runs.contains_key(&run.id) {
            return Err(TrackingError::Conflict);
        }
        state
            .runs
            .insert(run.id.clone(), WorkflowRecord::new(run.clone()));
        Ok(run)
    }

    async fn update_stage_status(
        &self,
        id: &WorkflowId,
        stage: &str,
        update: StageUpdate,
    ) -> Result<(), TrackingError> {
        let mut state = self.state.lock().await;
        let record = state.run_mut(id)?;
        let now = Utc::now();

        match record.stages.iter_mut().find(|row| row.stage == stage) {
            Some(row) => {
                row.status = update.status;
                row.outcome = update.outcome;
                row.updated_at = now;
            }
            None => record.stages.push(StageRecord {
                stage: stage.to_string(),
                status: update.status,
                outcome: update.outcome,
                updated_at: now,
            }),
        }
        record.run.updated_at = now;
        Ok(())
    }

    async fn update_run_status(
        &self,
        id: &WorkflowId,
        update: RunUpdate,
    ) -> Result<(), TrackingError> {
        let mut state = self.state.lock().await;
        let record = state.run_mut(id)?;
        record.run.status = update.status;
        if let Some(phase) = update.phase {
            record.run.phase = phase;
        }
        if update.reason.is_some() {
            record.status_reason = update.reason;
        }
        record.run.updated_at = Utc::now();
        Ok(())
    }

    async fn fetch_run(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, TrackingError> {
        Ok(self.state.lock().await.runs.get(id).cloned())
    }

    async fn read_employee_candidates(
        &self,
        _criteria: &AssignmentCriteria,
    ) -> Result<Vec<Candidate>, TrackingError> {
        let state = self.state.lock().await;
        Ok(state
            .employees
            .iter()
            .filter(|employee| employee.status == EmployeeStatus::Active)
            .map(|employee| Candidate {
                employee: employee.clone(),
                open_assignments: state.open_assignments(&employee.id),
            })
            .collect())
    }

    async fn record_assignment(&self, assignment: Assignment) -> Result<Assignment, TrackingError> {
        let mut state = self.state.lock().await;

        if !state.runs.contains_key(&assignment.workflow_id) {
            return Err(TrackingError::NotFound);
        }
        if state.open.contains_key(&assignment.workflow_id) {
            return Err(TrackingError::Conflict);
        }
        state.ensure_headroom(&assignment.employee_id)?;

        let record = state.run_mut(&assignment.workflow_id)?;
        record.run.phase = WorkflowPhase::Manual;
        record.run.status = RunStatus::InProgress;
        record.run.updated_at = Utc::now();
        record.assigned_employee = Some(assignment.employee_id.clone());
        record.status_reason = None;

        state.open_entry(assignment.clone());
        Ok(assignment)
    }

    async fn update_assignment_status(
        &self,
        id: &WorkflowId,
        status: AssignmentStatus,
    ) -> Result<Assignment, TrackingError> {
        let mut state = self.state.lock().await;
        if !status.is_open() {
            return state.close_entry(id, status).ok_or(TrackingError::NotFound);
        }

        let assignment = state
            .open_assignment_mut(id)
            .ok_or(TrackingError::NotFound)?;
        assignment.status = status;
        if status == AssignmentStatus::InProgress {
            assignment.started_at = Some(Utc::now());
        }
        Ok(assignment.clone())
    }

    async fn replace_assignment(&self, next: Assignment) -> Result<Assignment, TrackingError> {
        let mut state = self.state.lock().await;

        let current = state
            .open_assignment(&next.workflow_id)
            .map(|assignment| assignment.employee_id.clone())
            .ok_or(TrackingError::NotFound)?;
        if current == next.employee_id {
            return Err(TrackingError::Conflict);
        }
        state.ensure_headroom(&next.employee_id)?;

        state.close_entry(&next.workflow_id, AssignmentStatus::Reassigned);
        let record = state.run_mut(&next.workflow_id)?;
        record.assigned_employee = Some(next.employee_id.clone());
        record.status_reason = None;
        record.run.updated_at = Utc::now();

        state.open_entry(next.clone());
        Ok(next)
    }

    async fn active_assignment(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<Assignment>, TrackingError> {
        Ok(self.state.lock().await.open_assignment(id).cloned())
    }

    async fn upsert_employee(&self, employee: Employee) -> Result<(), TrackingError> {
        let mut state = self.state.lock().await;
        match state
            .employees
            .iter_mut()
            .find(|existing| existing.id == employee.id)
        {
            Some(existing) => *existing = employee,
            None => state.employees.push(employee),
        }
        Ok(())
    }
}
