//! Loan-origination workflow orchestration.
//!
//! A workflow runs a fixed plan of automated stages, then, when the transition conditions hold,
//! hands the application to a case-worker chosen by the assignment engine. Progress is persisted
//! through a [`TrackingStore`] so dashboards and restarts see the same state.

pub mod assignment;
pub mod config;
pub mod domain;
pub mod executor;
pub mod router;
pub mod sequencer;
pub mod service;
pub mod stages;
pub mod tracking;
pub mod transition;

#[cfg(test)]
mod tests;

pub use assignment::{
    Assignment, AssignmentCriteria, AssignmentEngine, AssignmentFailure, AssignmentFailureReason,
    AssignmentOutcome, AssignmentPolicy, AssignmentStatus, Candidate, ComplexityTier, Employee,
    EmployeeRole, EmployeeStatus, PriorityTier,
};
pub use config::{
    CompletionCriteria, CriteriaPolicy, DecisionRule, OrchestratorConfig, RolePermissions,
    ScoringWeights, StageSpec, TransitionConditions,
};
pub use domain::{
    ApplicationId, AutomatedPhaseResult, CreditDecision, CustomerTier, EmployeeId,
    LoanApplication, RiskLevel, RunStatus, StageDetail, StageFailure, StageOutcome, StageReport,
    StageSignals, StageStatus, WorkflowId, WorkflowPhase, WorkflowRun,
};
pub use executor::{Sleeper, StageExecutor, StagePolicy, TokioSleeper};
pub use router::origination_router;
pub use sequencer::AutomatedPhaseSequencer;
pub use service::{OrchestrationError, OriginationService, WorkflowReport};
pub use stages::{
    StageContext, StageFault, StageHandler, StageInput, StageRegistry, StageRegistryBuilder,
    StageResponse,
};
pub use tracking::{
    InMemoryTrackingStore, RunUpdate, StageUpdate, TrackingError, TrackingStore, WorkflowRecord,
    WorkflowStatusView,
};
pub use transition::{TransitionCheck, TransitionEvaluator, TransitionVerdict};
