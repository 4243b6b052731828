use serde::Serialize;

use super::config::TransitionConditions;
use super::domain::AutomatedPhaseResult;

/// A transition condition that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum TransitionCheck {
    AutomatedPhaseIncomplete,
    GatingApprovalMissing { stage: String },
    DecisionMismatch { stage: String, required: String, found: Option<String> },
    ComplianceViolation { stage: String, violations: Vec<String> },
}

impl TransitionCheck {
    pub fn describe(&self) -> String {
        match self {
            Self::AutomatedPhaseIncomplete => "automated phase did not complete".to_string(),
            Self::GatingApprovalMissing { stage } => {
                format!("{stage} did not report an explicit approval")
            }
            Self::DecisionMismatch {
                stage,
                required,
                found: Some(found),
            } => format!("{stage} decision was {found}, {required} required"),
            Self::DecisionMismatch {
                stage,
                required,
                found: None,
            } => format!("{stage} reported no decision, {required} required"),
            Self::ComplianceViolation { stage, violations } => {
                format!("{stage} flagged compliance violation(s): {}", violations.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionVerdict {
    pub failed: Vec<TransitionCheck>,
}

impl TransitionVerdict {
    pub fn qualifies(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn reason(&self) -> String {
        if self.failed.is_empty() {
            return "eligible for manual phase".to_string();
        }
        let details: Vec<String> = self.failed.iter().map(TransitionCheck::describe).collect();
        format!("not eligible for manual phase: {}", details.join("; "))
    }
}

/// Decides whether a completed automated run may be handed to a case-worker. Missing or
/// misshapen payloads fail the condition that reads them.
#[derive(Debug, Clone)]
pub struct TransitionEvaluator {
    conditions: TransitionConditions,
}

impl TransitionEvaluator {
    pub fn new(conditions: TransitionConditions) -> Self {
        Self { conditions }
    }

    pub fn qualifies_for_manual_phase(&self, result: &AutomatedPhaseResult) -> bool {
        self.evaluate(result).qualifies()
    }

    pub fn evaluate(&self, result: &AutomatedPhaseResult) -> TransitionVerdict {
        let mut failed = Vec::new();

        if !result.success {
            failed.push(TransitionCheck::AutomatedPhaseIncomplete);
        }

        if let Some(stage) = &self.conditions.gating_stage {
            let approved = result
                .report(stage)
                .and_then(|report| report.approved)
                .unwrap_or(false);
            if !approved {
                failed.push(TransitionCheck::GatingApprovalMissing {
                    stage: stage.clone(),
                });
            }
        }

        if let Some(rule) = &self.conditions.decision {
            let found = result.report(&rule.stage).and_then(|report| report.decision());
            if found != Some(rule.required) {
                failed.push(TransitionCheck::DecisionMismatch {
                    stage: rule.stage.clone(),
                    required: rule.required.label().to_string(),
                    found: found.map(|decision| decision.label().to_string()),
                });
            }
        }

        if self.conditions.forbid_compliance_violations {
            for outcome in &result.outcomes {
                let Some(signals) = outcome.signals() else {
                    continue;
                };
                if !signals.compliance_violations.is_empty() {
                    failed.push(TransitionCheck::ComplianceViolation {
                        stage: outcome.stage.clone(),
                        violations: signals.compliance_violations.clone(),
                    });
                }
            }
        }

        TransitionVerdict { failed }
    }
}
