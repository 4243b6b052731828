use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::domain::{ApplicationId, LoanApplication, StageOutcome, StageReport, WorkflowId};

/// Input handed to a stage: the original application plus every prior stage outcome, in order.
#[derive(Debug, Clone, Serialize)]
pub struct StageInput {
    pub application: LoanApplication,
    pub prior: Vec<StageOutcome>,
}

impl StageInput {
    pub fn new(application: LoanApplication) -> Self {
        Self {
            application,
            prior: Vec::new(),
        }
    }

    pub fn prior_report(&self, stage: &str) -> Option<&StageReport> {
        self.prior
            .iter()
            .find(|outcome| outcome.stage == stage && outcome.success)
            .and_then(|outcome| outcome.report.as_ref())
    }

    pub fn application_id(&self) -> Option<&ApplicationId> {
        self.prior
            .iter()
            .rev()
            .find_map(|outcome| outcome.application_id.as_ref())
    }
}

/// Per-attempt execution context.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub workflow_id: WorkflowId,
    pub stage: String,
    pub attempt: u32,
    /// Cancelled when the attempt exceeds its time budget.
    pub cancellation: CancellationToken,
}

/// Business-level response from a handler. `success` defaults to `false` when a serialized
/// response omits it, so only an explicit `true` counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<ApplicationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<StageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResponse {
    pub fn success(report: StageReport) -> Self {
        Self {
            success: true,
            report: Some(report),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_application_id(mut self, id: ApplicationId) -> Self {
        self.application_id = Some(id);
        self
    }
}

/// Unexpected fault raised by a handler (as opposed to a business rejection).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StageFault(pub String);

/// Uniform contract every automated stage implementation satisfies.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn process(
        &self,
        input: StageInput,
        context: StageContext,
    ) -> Result<StageResponse, StageFault>;
}

/// Immutable stage-name to handler mapping, constructed once and injected.
#[derive(Clone, Default)]
pub struct StageRegistry {
    handlers: HashMap<String, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    pub fn get(&self, stage: &str) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(stage).cloned()
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.handlers.contains_key(stage)
    }

    /// Names from `stages` with no registered handler, in the order given.
    pub fn missing<'a>(&self, stages: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        stages
            .into_iter()
            .filter(|stage| !self.contains(stage))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("StageRegistry")
            .field("stages", &names)
            .finish()
    }
}

#[derive(Default)]
pub struct StageRegistryBuilder {
    handlers: HashMap<String, Arc<dyn StageHandler>>,
}

impl StageRegistryBuilder {
    pub fn stage<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: StageHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn shared(mut self, name: impl Into<String>, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn build(self) -> StageRegistry {
        StageRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StageHandler for Noop {
        async fn process(
            &self,
            _input: StageInput,
            _context: StageContext,
        ) -> Result<StageResponse, StageFault> {
            Ok(StageResponse::success(StageReport::default()))
        }
    }

    #[test]
    fn registry_reports_missing_stages_in_order() {
        let registry = StageRegistry::builder()
            .stage("underwriting", Noop)
            .build();

        let missing = registry.missing(["pre_qualification", "underwriting", "credit_decision"]);

        assert_eq!(missing, vec!["pre_qualification", "credit_decision"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn response_without_success_field_is_not_successful() {
        let response: StageResponse =
            serde_json::from_str(r#"{"report": {"approved": true}}"#).expect("parses");
        assert!(!response.success);
    }
}
