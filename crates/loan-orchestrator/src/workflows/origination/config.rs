use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::assignment::EmployeeRole;
use super::domain::CreditDecision;

pub const PRE_QUALIFICATION: &str = "pre_qualification";
pub const LOAN_APPLICATION: &str = "loan_application";
pub const APPLICATION_PROCESSING: &str = "application_processing";
pub const UNDERWRITING: &str = "underwriting";
pub const CREDIT_DECISION: &str = "credit_decision";
pub const QUALITY_CHECK: &str = "quality_check";

/// Immutable snapshot of everything the orchestrator consumes for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub stages: Vec<StageSpec>,
    pub completion: CompletionCriteria,
    pub transition: TransitionConditions,
    pub criteria: CriteriaPolicy,
    pub roles: RolePermissions,
    pub scoring: ScoringWeights,
    /// Upper bound on select-then-commit rounds when a capacity race is lost.
    pub max_commit_attempts: u32,
}

impl OrchestratorConfig {
    /// Six-stage automated plan with final quality review as the gating stage.
    pub fn standard() -> Self {
        let stages = [
            PRE_QUALIFICATION,
            LOAN_APPLICATION,
            APPLICATION_PROCESSING,
            UNDERWRITING,
            CREDIT_DECISION,
            QUALITY_CHECK,
        ]
        .into_iter()
        .map(StageSpec::new)
        .collect();

        Self {
            stages,
            completion: CompletionCriteria {
                require_all_stages: true,
                approval_stage: Some(QUALITY_CHECK.to_string()),
                reject_manual_review: true,
            },
            transition: TransitionConditions {
                gating_stage: Some(QUALITY_CHECK.to_string()),
                decision: Some(DecisionRule {
                    stage: CREDIT_DECISION.to_string(),
                    required: CreditDecision::Approved,
                }),
                forbid_compliance_violations: true,
            },
            criteria: CriteriaPolicy::default(),
            roles: RolePermissions::default(),
            scoring: ScoringWeights::default(),
            max_commit_attempts: 3,
        }
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|spec| spec.name.as_str())
    }

    /// Apply uniform timeout/retry dials to every stage in the plan.
    pub fn with_retry_defaults(mut self, timeout_ms: u64, max_attempts: u32, base_delay_ms: u64) -> Self {
        for spec in &mut self.stages {
            spec.timeout_ms = timeout_ms;
            spec.max_attempts = max_attempts;
            spec.base_delay_ms = base_delay_ms;
        }
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::standard()
    }
}

const DEFAULT_STAGE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// One entry of the ordered stage plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout_ms: DEFAULT_STAGE_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Phase-level predicate evaluated after every stage has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionCriteria {
    pub require_all_stages: bool,
    /// Stage whose payload must carry `approved: true`.
    pub approval_stage: Option<String>,
    pub reject_manual_review: bool,
}

impl CompletionCriteria {
    pub fn permissive() -> Self {
        Self {
            require_all_stages: true,
            approval_stage: None,
            reject_manual_review: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRule {
    pub stage: String,
    pub required: CreditDecision,
}

/// Automated-to-manual gate. `None`/`false` disables the corresponding check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionConditions {
    pub gating_stage: Option<String>,
    pub decision: Option<DecisionRule>,
    pub forbid_compliance_violations: bool,
}

/// Heuristic dials used to derive assignment criteria. These are policy, so they stay
/// configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaPolicy {
    /// Stages consulted, in order, for the loan amount before falling back to the request.
    pub amount_stages: Vec<String>,
    pub risk_stage: String,
    pub flag_weight: f64,
    pub warning_weight: f64,
    pub high_complexity_score: f64,
    pub medium_complexity_score: f64,
    pub high_value_amount: u64,
    /// Priority bump threshold below `high_value_amount`.
    pub elevated_amount: u64,
    pub senior_approval_amount: u64,
    /// Amount from which a senior loan officer is the minimum role.
    pub senior_amount: u64,
    pub manager_amount: u64,
}

impl Default for CriteriaPolicy {
    fn default() -> Self {
        Self {
            amount_stages: vec![CREDIT_DECISION.to_string(), PRE_QUALIFICATION.to_string()],
            risk_stage: UNDERWRITING.to_string(),
            flag_weight: 1.0,
            warning_weight: 0.5,
            high_complexity_score: 5.0,
            medium_complexity_score: 2.0,
            high_value_amount: 1_000_000,
            elevated_amount: 500_000,
            senior_approval_amount: 1_000_000,
            senior_amount: 500_000,
            manager_amount: 1_000_000,
        }
    }
}

/// Loan-amount ceiling each role is authorized to handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissions {
    pub ceilings: BTreeMap<EmployeeRole, u64>,
}

impl RolePermissions {
    pub fn ceiling(&self, role: EmployeeRole) -> Option<u64> {
        self.ceilings.get(&role).copied()
    }

    pub fn authorizes(&self, role: EmployeeRole, amount: u64) -> bool {
        self.ceiling(role)
            .map(|ceiling| ceiling >= amount)
            .unwrap_or(false)
    }
}

impl Default for RolePermissions {
    fn default() -> Self {
        let mut ceilings = BTreeMap::new();
        ceilings.insert(EmployeeRole::LoanOfficer, 500_000);
        ceilings.insert(EmployeeRole::SeniorLoanOfficer, 1_000_000);
        ceilings.insert(EmployeeRole::Manager, 5_000_000);
        Self { ceilings }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub workload: f64,
    pub role_exact: f64,
    pub role_above: f64,
    pub role_weight: f64,
    pub specialization_weight: f64,
    /// Flat term standing in for an experience signal.
    pub experience_baseline: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            workload: 40.0,
            role_exact: 100.0,
            role_above: 80.0,
            role_weight: 0.30,
            specialization_weight: 0.20,
            experience_baseline: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_plan_orders_stages() {
        let config = OrchestratorConfig::standard();
        let names: Vec<&str> = config.stage_names().collect();
        assert_eq!(names.first(), Some(&PRE_QUALIFICATION));
        assert_eq!(names.last(), Some(&QUALITY_CHECK));
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn role_permissions_respect_ceilings() {
        let roles = RolePermissions::default();
        assert!(roles.authorizes(EmployeeRole::LoanOfficer, 500_000));
        assert!(!roles.authorizes(EmployeeRole::LoanOfficer, 500_001));
        assert!(!roles.authorizes(EmployeeRole::SeniorLoanOfficer, 1_200_000));
        assert!(roles.authorizes(EmployeeRole::Manager, 1_200_000));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = OrchestratorConfig::standard().with_retry_defaults(500, 2, 10);
        let json = serde_json::to_string(&config).expect("serializes");
        let parsed: OrchestratorConfig = serde_json::from_str(&json).expect("parses");
        assert_eq!(parsed, config);
        assert!(parsed.stages.iter().all(|spec| spec.max_attempts == 2));
    }
}
