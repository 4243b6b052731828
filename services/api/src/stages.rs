//! Rule-based stage handlers used by the bundled server and demo. Real deployments register
//! handlers backed by bureau, KYC and document services instead.

use async_trait::async_trait;
use loan_orchestrator::workflows::origination::config::{
    APPLICATION_PROCESSING, CREDIT_DECISION, LOAN_APPLICATION, PRE_QUALIFICATION, QUALITY_CHECK,
    UNDERWRITING,
};
use loan_orchestrator::workflows::origination::{
    ApplicationId, CreditDecision, LoanApplication, RiskLevel, StageContext, StageDetail,
    StageFault, StageHandler, StageInput, StageRegistry, StageReport, StageResponse, StageSignals,
};
use serde_json::json;

const MAX_FOIR: f64 = 0.60;
const ELEVATED_FOIR: f64 = 0.45;
const TENURE_MONTHS: u64 = 120;
const INCOME_MULTIPLE: u64 = 60;
const COLLATERAL_AMOUNT: u64 = 1_000_000;

pub(crate) fn rule_registry() -> StageRegistry {
    StageRegistry::builder()
        .stage(PRE_QUALIFICATION, PreQualification)
        .stage(LOAN_APPLICATION, ApplicationIntake)
        .stage(APPLICATION_PROCESSING, DocumentProcessing)
        .stage(UNDERWRITING, RuleUnderwriting)
        .stage(CREDIT_DECISION, DecisionDesk)
        .stage(QUALITY_CHECK, QualityReview)
        .build()
}

/// Fixed obligations to income ratio including the proposed instalment.
fn foir(application: &LoanApplication) -> Option<f64> {
    if application.monthly_income == 0 {
        return None;
    }
    let proposed = application.loan_amount / TENURE_MONTHS;
    Some((application.existing_emi + proposed) as f64 / application.monthly_income as f64)
}

struct PreQualification;

#[async_trait]
impl StageHandler for PreQualification {
    async fn process(
        &self,
        input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        let application = &input.application;
        let Some(ratio) = foir(application) else {
            return Ok(StageResponse::failure("monthly income is required"));
        };
        if ratio > MAX_FOIR {
            return Ok(StageResponse::failure(format!(
                "obligations at {:.0}% of income exceed the {:.0}% limit",
                ratio * 100.0,
                MAX_FOIR * 100.0
            )));
        }

        let mut signals = StageSignals::default();
        if application.employment_type == "self_employed" {
            signals.flags.push("variable_income".to_string());
        }
        if ratio > ELEVATED_FOIR {
            signals.warnings.push("elevated_foir".to_string());
        }

        let ceiling = application.monthly_income.saturating_mul(INCOME_MULTIPLE);
        let mut report = StageReport::approval(true)
            .with_detail(StageDetail::Screening {
                eligible_amount: Some(application.loan_amount.min(ceiling)),
            })
            .with_signals(signals);
        report.data = json!({ "foir": ratio });
        Ok(StageResponse::success(report))
    }
}

struct ApplicationIntake;

#[async_trait]
impl StageHandler for ApplicationIntake {
    async fn process(
        &self,
        input: StageInput,
        context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        if input.application.applicant_name.trim().is_empty() {
            return Ok(StageResponse::failure("applicant name is required"));
        }
        let number = context.workflow_id.0.trim_start_matches("wf-").to_string();
        Ok(StageResponse::success(StageReport::approval(true))
            .with_application_id(ApplicationId(format!("LA-{number}"))))
    }
}

struct DocumentProcessing;

#[async_trait]
impl StageHandler for DocumentProcessing {
    async fn process(
        &self,
        input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        if input.application_id().is_none() {
            return Err(StageFault("no application number on file".to_string()));
        }

        let mut signals = StageSignals::default();
        if input.application.loan_purpose.trim().is_empty() {
            signals.warnings.push("purpose_undeclared".to_string());
        }
        if input.application.loan_amount >= COLLATERAL_AMOUNT {
            signals.flags.push("collateral_valuation".to_string());
        }
        Ok(StageResponse::success(
            StageReport::approval(true).with_signals(signals),
        ))
    }
}

struct RuleUnderwriting;

#[async_trait]
impl StageHandler for RuleUnderwriting {
    async fn process(
        &self,
        input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        let eligible = input
            .prior_report(PRE_QUALIFICATION)
            .and_then(StageReport::amount)
            .ok_or_else(|| StageFault("pre-qualification amount missing".to_string()))?;
        let ratio = foir(&input.application).unwrap_or(1.0);

        let mut score = 820.0 - ratio * 300.0;
        if eligible >= COLLATERAL_AMOUNT {
            score -= 60.0;
        }
        let score = score.clamp(300.0, 900.0) as u16;
        let risk_level = match score {
            0..=649 => RiskLevel::High,
            650..=719 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };

        let mut signals = StageSignals::default();
        if risk_level == RiskLevel::High {
            signals.flags.push("high_risk_profile".to_string());
        }

        Ok(StageResponse::success(
            StageReport::approval(true)
                .with_detail(StageDetail::Underwriting {
                    risk_level: Some(risk_level),
                    risk_score: Some(score),
                    recommended_amount: Some(eligible),
                })
                .with_signals(signals),
        ))
    }
}

struct DecisionDesk;

#[async_trait]
impl StageHandler for DecisionDesk {
    async fn process(
        &self,
        input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        let report = input
            .prior_report(UNDERWRITING)
            .ok_or_else(|| StageFault("underwriting report missing".to_string()))?;
        let recommended = report.amount().unwrap_or_default();

        let decision = match report.risk_level() {
            Some(RiskLevel::High) if recommended < input.application.loan_amount => {
                CreditDecision::Rejected
            }
            Some(_) if recommended < input.application.loan_amount => CreditDecision::Conditional,
            Some(_) => CreditDecision::Approved,
            None => CreditDecision::ManualReview,
        };

        Ok(StageResponse::success(
            StageReport::approval(decision == CreditDecision::Approved).with_detail(
                StageDetail::CreditDecision {
                    decision: Some(decision),
                    approved_amount: Some(recommended),
                },
            ),
        ))
    }
}

struct QualityReview;

#[async_trait]
impl StageHandler for QualityReview {
    async fn process(
        &self,
        input: StageInput,
        _context: StageContext,
    ) -> Result<StageResponse, StageFault> {
        let decision = input
            .prior_report(CREDIT_DECISION)
            .and_then(StageReport::decision);
        let approved = decision == Some(CreditDecision::Approved);
        let grade = if approved { "A" } else { "C" };

        Ok(StageResponse::success(
            StageReport::approval(approved).with_detail(StageDetail::QualityReview {
                grade: Some(grade.to_string()),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loan_orchestrator::workflows::origination::{OrchestratorConfig, WorkflowId};

    fn context(stage: &str) -> StageContext {
        StageContext {
            workflow_id: WorkflowId("wf-000042".to_string()),
            stage: stage.to_string(),
            attempt: 1,
            cancellation: Default::default(),
        }
    }

    fn application(amount: u64, income: u64, emi: u64) -> LoanApplication {
        LoanApplication {
            applicant_name: "Meera Iyer".to_string(),
            loan_amount: amount,
            loan_purpose: "home_renovation".to_string(),
            employment_type: "salaried".to_string(),
            monthly_income: income,
            existing_emi: emi,
            customer_tier: None,
        }
    }

    #[test]
    fn registry_covers_standard_plan() {
        let registry = rule_registry();
        let config = OrchestratorConfig::standard();
        assert!(registry.missing(config.stage_names()).is_empty());
    }

    #[tokio::test]
    async fn pre_qualification_rejects_excessive_obligations() {
        let response = PreQualification
            .process(
                StageInput::new(application(600_000, 20_000, 9_000)),
                context(PRE_QUALIFICATION),
            )
            .await
            .expect("no fault");

        assert!(!response.success);
        assert!(response.error.unwrap_or_default().contains("exceed"));
    }

    #[tokio::test]
    async fn intake_issues_application_number_from_workflow() {
        let response = ApplicationIntake
            .process(
                StageInput::new(application(300_000, 90_000, 0)),
                context(LOAN_APPLICATION),
            )
            .await
            .expect("no fault");

        assert_eq!(
            response.application_id,
            Some(ApplicationId("LA-000042".to_string()))
        );
    }
}
