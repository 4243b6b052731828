use std::collections::BTreeSet;

use super::super::config::CriteriaPolicy;
use super::super::domain::{
    AutomatedPhaseResult, CustomerTier, LoanApplication, RiskLevel, StageReport,
};
use super::{AssignmentCriteria, ComplexityTier, EmployeeRole, PriorityTier};

pub const HIGH_VALUE: &str = "high_value";
pub const HIGH_RISK: &str = "high_risk";
pub const COMPLIANCE_REVIEW: &str = "compliance_review";
pub const SENIOR_APPROVAL: &str = "senior_approval";

/// Derive assignment criteria from a completed automated phase. Pure.
pub fn derive_criteria(
    result: &AutomatedPhaseResult,
    application: &LoanApplication,
    policy: &CriteriaPolicy,
) -> AssignmentCriteria {
    let loan_amount = policy
        .amount_stages
        .iter()
        .find_map(|stage| result.report(stage).and_then(StageReport::amount))
        .unwrap_or(application.loan_amount);

    let risk_level = result
        .report(&policy.risk_stage)
        .and_then(StageReport::risk_level)
        .unwrap_or(RiskLevel::Medium);

    let complexity_score = complexity_score(result, policy);
    let complexity = complexity_tier(complexity_score, policy);
    let priority = priority_tier(loan_amount, application.customer_tier, risk_level, policy);

    let compliance_concern = result.outcomes.iter().filter_map(|o| o.signals()).any(|signals| {
        !signals.compliance_violations.is_empty() || signals.requires_manual_review
    });

    let mut special_requirements = BTreeSet::new();
    if loan_amount >= policy.high_value_amount {
        special_requirements.insert(HIGH_VALUE.to_string());
    }
    if risk_level == RiskLevel::High {
        special_requirements.insert(HIGH_RISK.to_string());
    }
    if compliance_concern {
        special_requirements.insert(COMPLIANCE_REVIEW.to_string());
    }
    if complexity == ComplexityTier::High || loan_amount >= policy.senior_approval_amount {
        special_requirements.insert(SENIOR_APPROVAL.to_string());
    }

    AssignmentCriteria {
        loan_amount,
        risk_level,
        complexity,
        complexity_score,
        priority,
        special_requirements,
        required_role: required_role(loan_amount, complexity, policy),
    }
}

/// `Σ flags * flag_weight + warnings * warning_weight` across every recorded outcome.
pub fn complexity_score(result: &AutomatedPhaseResult, policy: &CriteriaPolicy) -> f64 {
    result
        .outcomes
        .iter()
        .filter_map(|outcome| outcome.signals())
        .map(|signals| {
            signals.flags.len() as f64 * policy.flag_weight
                + signals.warnings.len() as f64 * policy.warning_weight
        })
        .sum()
}

pub fn complexity_tier(score: f64, policy: &CriteriaPolicy) -> ComplexityTier {
    if score >= policy.high_complexity_score {
        ComplexityTier::High
    } else if score >= policy.medium_complexity_score {
        ComplexityTier::Medium
    } else {
        ComplexityTier::Low
    }
}

pub fn priority_tier(
    loan_amount: u64,
    tier: Option<CustomerTier>,
    risk_level: RiskLevel,
    policy: &CriteriaPolicy,
) -> PriorityTier {
    let mut points = 0u8;

    if loan_amount >= policy.high_value_amount {
        points += 2;
    } else if loan_amount >= policy.elevated_amount {
        points += 1;
    }

    points += match tier {
        Some(CustomerTier::Premium) => 2,
        Some(CustomerTier::Preferred) => 1,
        Some(CustomerTier::Standard) | None => 0,
    };

    if risk_level == RiskLevel::High {
        points += 1;
    }

    match points {
        0 => PriorityTier::Low,
        1 => PriorityTier::Normal,
        2 | 3 => PriorityTier::High,
        _ => PriorityTier::Urgent,
    }
}

pub fn required_role(
    loan_amount: u64,
    complexity: ComplexityTier,
    policy: &CriteriaPolicy,
) -> EmployeeRole {
    let high = complexity == ComplexityTier::High;
    if loan_amount >= policy.manager_amount || (high && loan_amount >= policy.senior_amount) {
        EmployeeRole::Manager
    } else if loan_amount >= policy.senior_amount || high {
        EmployeeRole::SeniorLoanOfficer
    } else {
        EmployeeRole::LoanOfficer
    }
}
