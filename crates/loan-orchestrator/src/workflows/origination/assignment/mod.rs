//! Employee assignment for the manual phase.
//!
//! Selection runs in three steps: derive criteria from the automated result, shortlist active
//! employees that are authorized and have headroom, then rank them. The commit is a conditional
//! write against the tracking store; losing a capacity race sends the engine back to re-read the
//! roster instead of over-assigning.

mod criteria;
mod scoring;

pub use criteria::{
    complexity_score, complexity_tier, derive_criteria, priority_tier, required_role,
    COMPLIANCE_REVIEW, HIGH_RISK, HIGH_VALUE, SENIOR_APPROVAL,
};
pub use scoring::{rank, score_candidate, CandidateScore};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{RolePermissions, ScoringWeights};
use super::domain::{ApplicationId, EmployeeId, RiskLevel, WorkflowId};
use super::tracking::{TrackingError, TrackingStore};

/// Ordered role hierarchy; derive order is the authority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeRole {
    LoanOfficer,
    SeniorLoanOfficer,
    Manager,
}

impl EmployeeRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::LoanOfficer => "loan_officer",
            Self::SeniorLoanOfficer => "senior_loan_officer",
            Self::Manager => "manager",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Inactive,
    OnLeave,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub role: EmployeeRole,
    pub status: EmployeeStatus,
    #[serde(default)]
    pub specializations: BTreeSet<String>,
    pub max_concurrent_assignments: u32,
}

/// Roster entry paired with its derived open-assignment count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub employee: Employee,
    pub open_assignments: u32,
}

impl Candidate {
    pub fn has_capacity(&self) -> bool {
        self.open_assignments < self.employee.max_concurrent_assignments
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Low,
    Normal,
    High,
    Urgent,
}

/// Derived feature set used to pick an employee. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentCriteria {
    pub loan_amount: u64,
    pub risk_level: RiskLevel,
    pub complexity: ComplexityTier,
    pub complexity_score: f64,
    pub priority: PriorityTier,
    pub special_requirements: BTreeSet<String>,
    pub required_role: EmployeeRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Completed,
    Reassigned,
}

impl AssignmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Reassigned => "reassigned",
        }
    }

    /// Open assignments count against the employee's capacity.
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub workflow_id: WorkflowId,
    pub employee_id: EmployeeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<ApplicationId>,
    pub criteria: AssignmentCriteria,
    pub score: f64,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Operational reason codes for a failed assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentFailureReason {
    NoQualifiedEmployee,
    CapacityExhausted,
    AlreadyAssigned,
}

impl AssignmentFailureReason {
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoQualifiedEmployee => "no_qualified_employee",
            Self::CapacityExhausted => "capacity_exhausted",
            Self::AlreadyAssigned => "already_assigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentFailure {
    pub reason: AssignmentFailureReason,
    pub detail: String,
}

impl AssignmentFailure {
    fn new(reason: AssignmentFailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned(Assignment),
    /// Selection succeeded but the store did not confirm the write; needs reconciliation.
    Uncommitted {
        assignment: Assignment,
        warning: String,
    },
    Failed(AssignmentFailure),
}

impl AssignmentOutcome {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            Self::Assigned(assignment) => Some(assignment),
            Self::Uncommitted { .. } | Self::Failed(_) => None,
        }
    }

    pub fn failure_reason(&self) -> Option<AssignmentFailureReason> {
        match self {
            Self::Failed(failure) => Some(failure.reason),
            Self::Assigned(_) | Self::Uncommitted { .. } => None,
        }
    }
}

/// Dials the engine reads from the per-run configuration snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentPolicy<'a> {
    pub roles: &'a RolePermissions,
    pub weights: &'a ScoringWeights,
    pub max_commit_attempts: u32,
}

/// Active, authorized, specialization-compatible candidates at or above the required role with
/// remaining capacity. `exclude` drops the current owner when reassigning.
pub fn shortlist(
    candidates: Vec<Candidate>,
    criteria: &AssignmentCriteria,
    roles: &RolePermissions,
    exclude: Option<&EmployeeId>,
) -> Result<Vec<Candidate>, AssignmentFailure> {
    let qualified: Vec<Candidate> = candidates
        .into_iter()
        .filter(|candidate| candidate.employee.status == EmployeeStatus::Active)
        .filter(|candidate| Some(&candidate.employee.id) != exclude)
        .filter(|candidate| candidate.employee.role >= criteria.required_role)
        .filter(|candidate| roles.authorizes(candidate.employee.role, criteria.loan_amount))
        .filter(|candidate| covers_requirements(&candidate.employee, &criteria.special_requirements))
        .collect();

    if qualified.is_empty() {
        return Err(AssignmentFailure::new(
            AssignmentFailureReason::NoQualifiedEmployee,
            format!(
                "no active {} or above authorized for amount {} with requirements [{}]",
                criteria.required_role.label(),
                criteria.loan_amount,
                joined(&criteria.special_requirements)
            ),
        ));
    }

    let qualified_count = qualified.len();
    let available: Vec<Candidate> = qualified
        .into_iter()
        .filter(Candidate::has_capacity)
        .collect();

    if available.is_empty() {
        return Err(AssignmentFailure::new(
            AssignmentFailureReason::CapacityExhausted,
            format!("all {qualified_count} qualified employee(s) are at capacity"),
        ));
    }

    Ok(available)
}

fn covers_requirements(employee: &Employee, requirements: &BTreeSet<String>) -> bool {
    requirements.is_empty()
        || requirements
            .iter()
            .any(|tag| employee.specializations.contains(tag))
}

fn joined(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Selects and commits a manual-phase owner for a workflow.
pub struct AssignmentEngine<T> {
    store: Arc<T>,
}

impl<T> AssignmentEngine<T>
where
    T: TrackingStore + 'static,
{
    pub fn new(store: Arc<T>) -> Self {
        Self { store }
    }

    /// Only a failure to read the roster propagates; write failures after selection come back
    /// as [`AssignmentOutcome::Uncommitted`].
    pub async fn assign(
        &self,
        workflow_id: &WorkflowId,
        application_id: Option<&ApplicationId>,
        criteria: &AssignmentCriteria,
        policy: AssignmentPolicy<'_>,
    ) -> Result<AssignmentOutcome, TrackingError> {
        self.select_and_commit(workflow_id, application_id, criteria, policy, None)
            .await
    }

    /// Hands an open assignment to a different employee under the same criteria. The current
    /// owner keeps the work unless the swap commits.
    pub async fn reassign(
        &self,
        current: &Assignment,
        policy: AssignmentPolicy<'_>,
    ) -> Result<AssignmentOutcome, TrackingError> {
        self.select_and_commit(
            &current.workflow_id,
            current.application_id.as_ref(),
            &current.criteria,
            policy,
            Some(&current.employee_id),
        )
        .await
    }

    async fn select_and_commit(
        &self,
        workflow_id: &WorkflowId,
        application_id: Option<&ApplicationId>,
        criteria: &AssignmentCriteria,
        policy: AssignmentPolicy<'_>,
        replacing: Option<&EmployeeId>,
    ) -> Result<AssignmentOutcome, TrackingError> {
        let rounds = policy.max_commit_attempts.max(1);

        for round in 1..=rounds {
            let roster = self.store.read_employee_candidates(criteria).await?;
            let available = match shortlist(roster, criteria, policy.roles, replacing) {
                Ok(available) => available,
                Err(failure) => {
                    warn!(
                        %workflow_id,
                        reason = failure.reason.code(),
                        detail = %failure.detail,
                        "assignment failed"
                    );
                    return Ok(AssignmentOutcome::Failed(failure));
                }
            };

            let ranked = rank(&available, criteria, policy.weights);
            let Some(best) = ranked.into_iter().next() else {
                break;
            };

            let assignment = Assignment {
                workflow_id: workflow_id.clone(),
                employee_id: best.employee_id.clone(),
                application_id: application_id.cloned(),
                criteria: criteria.clone(),
                score: best.total,
                status: AssignmentStatus::Assigned,
                assigned_at: Utc::now(),
                started_at: None,
                completed_at: None,
            };

            let committed = match replacing {
                None => self.store.record_assignment(assignment.clone()).await,
                Some(_) => self.store.replace_assignment(assignment.clone()).await,
            };

            match committed {
                Ok(stored) => {
                    info!(
                        %workflow_id,
                        employee_id = %stored.employee_id,
                        previous = ?replacing.map(|id| id.0.as_str()),
                        score = stored.score,
                        "manual phase assigned"
                    );
                    return Ok(AssignmentOutcome::Assigned(stored));
                }
                Err(TrackingError::CapacityConflict) => {
                    debug!(%workflow_id, round, employee_id = %best.employee_id, "capacity race lost, reselecting");
                }
                Err(TrackingError::Conflict) => {
                    return Ok(AssignmentOutcome::Failed(AssignmentFailure::new(
                        AssignmentFailureReason::AlreadyAssigned,
                        format!("workflow {workflow_id} already has an active assignment"),
                    )));
                }
                Err(err) => {
                    warn!(%workflow_id, error = %err, "assignment selected but not committed");
                    return Ok(AssignmentOutcome::Uncommitted {
                        warning: format!(
                            "assignment to {} requires reconciliation: {err}",
                            assignment.employee_id
                        ),
                        assignment,
                    });
                }
            }
        }

        Ok(AssignmentOutcome::Failed(AssignmentFailure::new(
            AssignmentFailureReason::CapacityExhausted,
            format!("capacity claimed concurrently on each of {rounds} attempt(s)"),
        )))
    }
}
