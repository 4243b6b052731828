use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::StageSpec;
use super::domain::{StageFailure, StageOutcome, WorkflowId};
use super::stages::{StageContext, StageHandler, StageInput, StageResponse};

/// Delay primitive used between retries so backoff can be observed without wall-clock waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Timeout and retry budget for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl StagePolicy {
    pub fn new(timeout: Duration, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            timeout,
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the retry that follows `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(attempt)
            .unwrap_or(Duration::MAX)
    }
}

impl From<&StageSpec> for StagePolicy {
    fn from(spec: &StageSpec) -> Self {
        Self::new(spec.timeout(), spec.max_attempts, spec.base_delay())
    }
}

/// Runs a single stage handler with a timeout and bounded retries. Never touches the
/// tracking store.
#[derive(Clone)]
pub struct StageExecutor {
    sleeper: Arc<dyn Sleeper>,
}

impl Default for StageExecutor {
    fn default() -> Self {
        Self::new(Arc::new(TokioSleeper))
    }
}

impl StageExecutor {
    pub fn new(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    pub async fn execute(
        &self,
        workflow_id: &WorkflowId,
        stage: &str,
        handler: Arc<dyn StageHandler>,
        input: StageInput,
        policy: StagePolicy,
    ) -> StageOutcome {
        let started = Instant::now();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .attempt(workflow_id, stage, &handler, input.clone(), attempt, policy.timeout)
                .await;

            match result {
                Ok(response) => {
                    debug!(%workflow_id, stage, attempt, "stage attempt succeeded");
                    return StageOutcome {
                        stage: stage.to_string(),
                        success: true,
                        application_id: response.application_id,
                        report: response.report,
                        failure: None,
                        duration_ms: elapsed_ms(started),
                        attempts: attempt,
                        recorded_at: Utc::now(),
                    };
                }
                Err(failure) => {
                    warn!(
                        %workflow_id,
                        stage,
                        attempt,
                        max_attempts,
                        reason = failure.reason(),
                        "stage attempt failed"
                    );

                    if attempt >= max_attempts {
                        return StageOutcome {
                            stage: stage.to_string(),
                            success: false,
                            application_id: None,
                            report: None,
                            failure: Some(failure),
                            duration_ms: elapsed_ms(started),
                            attempts: attempt,
                            recorded_at: Utc::now(),
                        };
                    }

                    self.sleeper.sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        workflow_id: &WorkflowId,
        stage: &str,
        handler: &Arc<dyn StageHandler>,
        input: StageInput,
        attempt: u32,
        timeout: Duration,
    ) -> Result<StageResponse, StageFailure> {
        let cancellation = CancellationToken::new();
        let context = StageContext {
            workflow_id: workflow_id.clone(),
            stage: stage.to_string(),
            attempt,
            cancellation: cancellation.clone(),
        };

        let handler = Arc::clone(handler);
        let mut task = tokio::spawn(async move { handler.process(input, context).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(response))) if response.success => Ok(response),
            Ok(Ok(Ok(response))) => Err(StageFailure::HandlerFailure(
                response
                    .error
                    .unwrap_or_else(|| "stage did not report success".to_string()),
            )),
            Ok(Ok(Err(fault))) => Err(StageFailure::HandlerFault(fault.to_string())),
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    "handler panicked"
                } else {
                    "handler task cancelled"
                };
                Err(StageFailure::HandlerFault(message.to_string()))
            }
            Err(_) => {
                cancellation.cancel();
                task.abort();
                Err(StageFailure::Timeout)
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
