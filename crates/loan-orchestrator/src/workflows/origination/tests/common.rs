use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::workflows::origination::assignment::{
    Assignment, AssignmentCriteria, AssignmentStatus, Candidate, Employee, EmployeeRole,
    EmployeeStatus,
};
use crate::workflows::origination::config::{
    OrchestratorConfig, StageSpec, APPLICATION_PROCESSING, CREDIT_DECISION, LOAN_APPLICATION,
    PRE_QUALIFICATION, QUALITY_CHECK, UNDERWRITING,
};
use crate::workflows::origination::domain::{
    ApplicationId, CreditDecision, CustomerTier, EmployeeId, LoanApplication, RiskLevel,
    StageDetail, StageReport, StageSignals, WorkflowId, WorkflowRun,
};
use crate::workflows::origination::executor::{Sleeper, StageExecutor};
use crate::workflows::origination::service::OriginationService;
use crate::workflows::origination::stages::{
    StageContext, StageFault, StageHandler, StageInput, StageRegistry, StageResponse,
};
use crate::workflows::origination::tracking::{
    InMemoryTrackingStore, RunUpdate, StageUpdate, TrackingError, TrackingStore, WorkflowRecord,
};

pub(super) fn application(amount: u64) -> LoanApplication {
    LoanApplication {
        applicant_name: "Asha Verma".to_string(),
        loan_amount: amount,
        loan_purpose: "home_purchase".to_string(),
        employment_type: "salaried".to_string(),
        monthly_income: 185_000,
        existing_emi: 12_000,
        customer_tier: Some(CustomerTier::Standard),
    }
}

pub(super) fn workflow_id(value: &str) -> WorkflowId {
    WorkflowId(value.to_string())
}

/// Handler that replays a fixed response and counts invocations.
pub(super) struct ScriptedStage {
    response: StageResponse,
    calls: AtomicU32,
}

impl ScriptedStage {
    pub(super) fn new(response: StageResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicU32::new(0),
        })
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageHandler for ScriptedStage {
    async fn process(
        &self,
        _input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Fails with a business rejection for the first `failures` attempts, then succeeds.
pub(super) struct FlakyStage {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyStage {
    pub(super) fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageHandler for FlakyStage {
    async fn process(
        &self,
        _input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Ok(StageResponse::failure(format!("bureau unavailable on call {call}")))
        } else {
            Ok(StageResponse::success(StageReport::approval(true)))
        }
    }
}

/// Sleeps far longer than any test timeout; records whether it observed cancellation.
pub(super) struct SlowStage {
    delay: Duration,
    calls: AtomicU32,
    cancelled: AtomicU32,
}

impl SlowStage {
    pub(super) fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicU32::new(0),
            cancelled: AtomicU32::new(0),
        })
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageHandler for SlowStage {
    async fn process(
        &self,
        _input: StageInput,
        context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {
                Ok(StageResponse::success(StageReport::approval(true)))
            }
            _ = context.cancellation.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(StageFault("cancelled".to_string()))
            }
        }
    }
}

pub(super) struct FaultyStage;

#[async_trait]
impl StageHandler for FaultyStage {
    async fn process(
        &self,
        _input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        Err(StageFault("connection reset by bureau".to_string()))
    }
}

pub(super) struct PanickingStage;

#[async_trait]
impl StageHandler for PanickingStage {
    async fn process(
        &self,
        _input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        panic!("stage handler bug");
    }
}

/// Captures backoff requests instead of waiting.
#[derive(Default)]
pub(super) struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(super) fn delays(&self) -> Vec<Duration> {
        self.delays.lock().expect("sleeper mutex poisoned").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .expect("sleeper mutex poisoned")
            .push(duration);
    }
}

pub(super) fn recording_executor() -> (StageExecutor, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    (StageExecutor::new(sleeper.clone()), sleeper)
}

/// Responses for the standard plan in which every stage approves.
pub(super) fn approving_responses(amount: u64) -> Vec<(&'static str, StageResponse)> {
    vec![
        (
            PRE_QUALIFICATION,
            StageResponse::success(StageReport::approval(true).with_detail(
                StageDetail::Screening {
                    eligible_amount: Some(amount),
                },
            )),
        ),
        (
            LOAN_APPLICATION,
            StageResponse::success(StageReport::approval(true))
                .with_application_id(ApplicationId("LA-1001".to_string())),
        ),
        (
            APPLICATION_PROCESSING,
            StageResponse::success(StageReport::approval(true)),
        ),
        (
            UNDERWRITING,
            StageResponse::success(StageReport::approval(true).with_detail(
                StageDetail::Underwriting {
                    risk_level: Some(RiskLevel::Low),
                    risk_score: Some(742),
                    recommended_amount: Some(amount),
                },
            )),
        ),
        (
            CREDIT_DECISION,
            StageResponse::success(StageReport::approval(true).with_detail(
                StageDetail::CreditDecision {
                    decision: Some(CreditDecision::Approved),
                    approved_amount: Some(amount),
                },
            )),
        ),
        (
            QUALITY_CHECK,
            StageResponse::success(StageReport::approval(true).with_detail(
                StageDetail::QualityReview {
                    grade: Some("A".to_string()),
                },
            )),
        ),
    ]
}

pub(super) fn replace_response(
    responses: &mut [(&'static str, StageResponse)],
    stage: &str,
    response: StageResponse,
) {
    if let Some(entry) = responses.iter_mut().find(|(name, _)| *name == stage) {
        entry.1 = response;
    }
}

pub(super) fn flagged(flags: usize) -> StageSignals {
    StageSignals {
        flags: (0..flags).map(|i| format!("flag-{i}")).collect(),
        ..StageSignals::default()
    }
}

pub(super) fn registry_from(responses: Vec<(&'static str, StageResponse)>) -> StageRegistry {
    responses
        .into_iter()
        .fold(StageRegistry::builder(), |builder, (name, response)| {
            builder.shared(name, ScriptedStage::new(response))
        })
        .build()
}

/// Standard plan with instant retries and short timeouts.
pub(super) fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::standard().with_retry_defaults(1_000, 2, 0)
}

pub(super) fn plan(names: &[&str], max_attempts: u32, timeout_ms: u64) -> Vec<StageSpec> {
    names
        .iter()
        .map(|name| StageSpec {
            max_attempts,
            timeout_ms,
            base_delay_ms: 10,
            ..StageSpec::new(*name)
        })
        .collect()
}

pub(super) fn employee(
    id: &str,
    role: EmployeeRole,
    specializations: &[&str],
    capacity: u32,
) -> Employee {
    Employee {
        id: EmployeeId(id.to_string()),
        name: format!("Employee {id}"),
        role,
        status: EmployeeStatus::Active,
        specializations: specializations.iter().map(|tag| tag.to_string()).collect(),
        max_concurrent_assignments: capacity,
    }
}

pub(super) fn roster() -> Vec<Employee> {
    vec![
        employee("lo-1", EmployeeRole::LoanOfficer, &[], 5),
        employee(
            "slo-1",
            EmployeeRole::SeniorLoanOfficer,
            &["high_value", "high_risk"],
            4,
        ),
        employee(
            "mgr-1",
            EmployeeRole::Manager,
            &["high_value", "senior_approval", "compliance_review"],
            3,
        ),
    ]
}

pub(super) fn candidate(employee: Employee, open_assignments: u32) -> Candidate {
    Candidate {
        employee,
        open_assignments,
    }
}

pub(super) fn criteria(amount: u64, required_role: EmployeeRole) -> AssignmentCriteria {
    AssignmentCriteria {
        loan_amount: amount,
        risk_level: RiskLevel::Low,
        complexity: crate::workflows::origination::assignment::ComplexityTier::Low,
        complexity_score: 0.0,
        priority: crate::workflows::origination::assignment::PriorityTier::Normal,
        special_requirements: BTreeSet::new(),
        required_role,
    }
}

pub(super) fn assignment(workflow: &WorkflowId, employee_id: &str) -> Assignment {
    Assignment {
        workflow_id: workflow.clone(),
        employee_id: EmployeeId(employee_id.to_string()),
        application_id: None,
        criteria: criteria(100_000, EmployeeRole::LoanOfficer),
        score: 100.0,
        status: AssignmentStatus::Assigned,
        assigned_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

pub(super) fn build_service(
    registry: StageRegistry,
    store: Arc<InMemoryTrackingStore>,
) -> OriginationService<InMemoryTrackingStore> {
    let (executor, _) = recording_executor();
    OriginationService::with_executor(registry, store, fast_config(), executor)
        .expect("standard plan is fully registered")
}

pub(super) fn approving_service(
    amount: u64,
) -> (
    OriginationService<InMemoryTrackingStore>,
    Arc<InMemoryTrackingStore>,
) {
    let store = Arc::new(InMemoryTrackingStore::with_employees(roster()));
    let service = build_service(registry_from(approving_responses(amount)), store.clone());
    (service, store)
}

pub(super) async fn seed_run(store: &InMemoryTrackingStore, id: &str, amount: u64) -> WorkflowId {
    let run = WorkflowRun::new(workflow_id(id), application(amount));
    store.create_run(run).await.expect("run created").id
}

/// Every call fails as if the backing database were offline.
pub(super) struct UnavailableStore;

fn offline() -> TrackingError {
    TrackingError::Unavailable("database offline".to_string())
}

#[async_trait]
impl TrackingStore for UnavailableStore {
    async fn create_run(&self, _run: WorkflowRun) -> Result<WorkflowRun, TrackingError> {
        Err(offline())
    }

    async fn update_stage_status(
        &self,
        _id: &WorkflowId,
        _stage: &str,
        _update: StageUpdate,
    ) -> Result<(), TrackingError> {
        Err(offline())
    }

    async fn update_run_status(
        &self,
        _id: &WorkflowId,
        _update: RunUpdate,
    ) -> Result<(), TrackingError> {
        Err(offline())
    }

    async fn fetch_run(&self, _id: &WorkflowId) -> Result<Option<WorkflowRecord>, TrackingError> {
        Err(offline())
    }

    async fn read_employee_candidates(
        &self,
        _criteria: &AssignmentCriteria,
    ) -> Result<Vec<Candidate>, TrackingError> {
        Err(offline())
    }

    async fn record_assignment(&self, _assignment: Assignment) -> Result<Assignment, TrackingError> {
        Err(offline())
    }

    async fn update_assignment_status(
        &self,
        _id: &WorkflowId,
        _status: AssignmentStatus,
    ) -> Result<Assignment, TrackingError> {
        Err(offline())
    }

    async fn replace_assignment(&self, _next: Assignment) -> Result<Assignment, TrackingError> {
        Err(offline())
    }

    async fn active_assignment(
        &self,
        _id: &WorkflowId,
    ) -> Result<Option<Assignment>, TrackingError> {
        Err(offline())
    }

    async fn upsert_employee(&self, _employee: Employee) -> Result<(), TrackingError> {
        Err(offline())
    }
}

/// Delegates to the in-memory store but refuses to commit or replace assignments. Seed an
/// existing assignment through `inner` when a test needs one.
#[derive(Default)]
pub(super) struct UncommittableStore {
    pub(super) inner: InMemoryTrackingStore,
}

#[async_trait]
impl TrackingStore for UncommittableStore {
    async fn create_run(&self, run: WorkflowRun) -> Result<WorkflowRun, TrackingError> {
        self.inner.create_run(run).await
    }

    async fn update_stage_status(
        &self,
        id: &WorkflowId,
        stage: &str,
        update: StageUpdate,
    ) -> Result<(), TrackingError> {
        self.inner.update_stage_status(id, stage, update).await
    }

    async fn update_run_status(
        &self,
        id: &WorkflowId,
        update: RunUpdate,
    ) -> Result<(), TrackingError> {
        self.inner.update_run_status(id, update).await
    }

    async fn fetch_run(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, TrackingError> {
        self.inner.fetch_run(id).await
    }

    async fn read_employee_candidates(
        &self,
        criteria: &AssignmentCriteria,
    ) -> Result<Vec<Candidate>, TrackingError> {
        self.inner.read_employee_candidates(criteria).await
    }

    async fn record_assignment(&self, _assignment: Assignment) -> Result<Assignment, TrackingError> {
        Err(TrackingError::Unavailable("write timed out".to_string()))
    }

    async fn update_assignment_status(
        &self,
        id: &WorkflowId,
        status: AssignmentStatus,
    ) -> Result<Assignment, TrackingError> {
        self.inner.update_assignment_status(id, status).await
    }

    async fn replace_assignment(&self, _next: Assignment) -> Result<Assignment, TrackingError> {
        Err(TrackingError::Unavailable("write timed out".to_string()))
    }

    async fn active_assignment(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<Assignment>, TrackingError> {
        self.inner.active_assignment(id).await
    }

    async fn upsert_employee(&self, employee: Employee) -> Result<(), TrackingError> {
        self.inner.upsert_employee(employee).await
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
