use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier wrapper for a single workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier issued by stage handlers once an application number exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Applicant data captured at submission; immutable for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub applicant_name: String,
    pub loan_amount: u64,
    pub loan_purpose: String,
    pub employment_type: String,
    pub monthly_income: u64,
    #[serde(default)]
    pub existing_emi: u64,
    #[serde(default)]
    pub customer_tier: Option<CustomerTier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    Standard,
    Preferred,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Automated,
    Manual,
}

impl WorkflowPhase {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Automated => "automated",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
    Error,
}

impl RunStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Per-stage state machine: `pending -> running -> (completed | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Outcome reported by the credit decision stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditDecision {
    Approved,
    Conditional,
    Rejected,
    ManualReview,
}

impl CreditDecision {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Conditional => "conditional",
            Self::Rejected => "rejected",
            Self::ManualReview => "manual_review",
        }
    }
}

/// Cross-cutting signals every stage may raise regardless of its category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSignals {
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub compliance_violations: Vec<String>,
    #[serde(default)]
    pub requires_manual_review: bool,
}

/// Category-specific payload. Every field is optional so that a missing value can be told
/// apart from a negative one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetail {
    Screening {
        eligible_amount: Option<u64>,
    },
    Underwriting {
        risk_level: Option<RiskLevel>,
        risk_score: Option<u16>,
        recommended_amount: Option<u64>,
    },
    CreditDecision {
        decision: Option<CreditDecision>,
        approved_amount: Option<u64>,
    },
    QualityReview {
        grade: Option<String>,
    },
    #[default]
    General,
}

/// Result envelope returned by a stage handler on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub signals: StageSignals,
    #[serde(default)]
    pub detail: StageDetail,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl StageReport {
    pub fn approval(approved: bool) -> Self {
        Self {
            approved: Some(approved),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, detail: StageDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_signals(mut self, signals: StageSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        match &self.detail {
            StageDetail::Underwriting { risk_level, .. } => *risk_level,
            _ => None,
        }
    }

    pub fn decision(&self) -> Option<CreditDecision> {
        match &self.detail {
            StageDetail::CreditDecision { decision, .. } => *decision,
            _ => None,
        }
    }

    /// Loan amount asserted by the stage, if its category carries one.
    pub fn amount(&self) -> Option<u64> {
        match &self.detail {
            StageDetail::Screening { eligible_amount } => *eligible_amount,
            StageDetail::Underwriting {
                recommended_amount, ..
            } => *recommended_amount,
            StageDetail::CreditDecision {
                approved_amount, ..
            } => *approved_amount,
            StageDetail::QualityReview { .. } | StageDetail::General => None,
        }
    }
}

/// Why a stage attempt (and therefore the stage) did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum StageFailure {
    Timeout,
    HandlerFailure(String),
    HandlerFault(String),
    UnregisteredStage,
}

impl StageFailure {
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::HandlerFailure(_) => "handler_failure",
            Self::HandlerFault(_) => "handler_fault",
            Self::UnregisteredStage => "unregistered_stage",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::HandlerFailure(message) => format!("handler failure: {message}"),
            Self::HandlerFault(message) => format!("handler fault: {message}"),
            Self::UnregisteredStage => "no handler registered".to_string(),
        }
    }
}

/// Normalised record of one stage execution. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<ApplicationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl StageOutcome {
    pub fn status(&self) -> StageStatus {
        if self.success {
            StageStatus::Completed
        } else {
            StageStatus::Failed
        }
    }

    pub fn signals(&self) -> Option<&StageSignals> {
        self.report.as_ref().map(|report| &report.signals)
    }
}

/// Aggregate result of driving every configured stage of the automated phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomatedPhaseResult {
    pub workflow_id: WorkflowId,
    pub outcomes: Vec<StageOutcome>,
    pub errors: Vec<String>,
    pub success: bool,
    pub total_duration_ms: u64,
}

impl AutomatedPhaseResult {
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|outcome| outcome.stage == stage)
    }

    /// Successful report for `stage`, ignoring failed or payload-less outcomes.
    pub fn report(&self, stage: &str) -> Option<&StageReport> {
        self.outcome(stage)
            .filter(|outcome| outcome.success)
            .and_then(|outcome| outcome.report.as_ref())
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .map(|outcome| outcome.stage.as_str())
            .collect()
    }

    pub fn application_id(&self) -> Option<&ApplicationId> {
        self.outcomes
            .iter()
            .rev()
            .find_map(|outcome| outcome.application_id.as_ref())
    }

    pub fn summary(&self) -> String {
        if self.success {
            "automated phase completed".to_string()
        } else if self.errors.is_empty() {
            "automated phase failed".to_string()
        } else {
            format!("automated phase failed: {}", self.errors.join("; "))
        }
    }
}

/// Persisted workflow header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: WorkflowId,
    pub application: LoanApplication,
    pub phase: WorkflowPhase,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(id: WorkflowId, application: LoanApplication) -> Self {
        let now = Utc::now();
        Self {
            id,
            application,
            phase: WorkflowPhase::Automated,
            status: RunStatus::InProgress,
            created_at: now,
            updated_at: now,
        }
    }
}
