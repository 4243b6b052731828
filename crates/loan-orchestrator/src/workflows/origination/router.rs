use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::error;

use super::domain::{LoanApplication, WorkflowId};
use super::service::{OrchestrationError, OriginationService};
use super::tracking::{TrackingError, TrackingStore};

/// Router builder exposing workflow intake, status and manual-phase endpoints.
pub fn origination_router<T>(service: Arc<OriginationService<T>>) -> Router
where
    T: TrackingStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/origination/workflows",
            post(submit_handler::<T>),
        )
        .route(
            "/api/v1/origination/workflows/:workflow_id",
            get(status_handler::<T>),
        )
        .route(
            "/api/v1/origination/workflows/:workflow_id/manual/start",
            post(start_manual_handler::<T>),
        )
        .route(
            "/api/v1/origination/workflows/:workflow_id/manual/complete",
            post(complete_manual_handler::<T>),
        )
        .route(
            "/api/v1/origination/workflows/:workflow_id/reassign",
            post(reassign_handler::<T>),
        )
        .with_state(service)
}

pub(crate) async fn submit_handler<T>(
    State(service): State<Arc<OriginationService<T>>>,
    axum::Json(application): axum::Json<LoanApplication>,
) -> Response
where
    T: TrackingStore + 'static,
{
    match service.spawn(application).await {
        Ok((run, _handle)) => {
            let payload = json!({
                "workflow_id": run.id,
                "phase": run.phase.label(),
                "status": run.status.label(),
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<T>(
    State(service): State<Arc<OriginationService<T>>>,
    Path(workflow_id): Path<String>,
) -> Response
where
    T: TrackingStore + 'static,
{
    match service.status(&WorkflowId(workflow_id)).await {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn start_manual_handler<T>(
    State(service): State<Arc<OriginationService<T>>>,
    Path(workflow_id): Path<String>,
) -> Response
where
    T: TrackingStore + 'static,
{
    match service.start_manual_review(&WorkflowId(workflow_id)).await {
        Ok(assignment) => (StatusCode::OK, axum::Json(assignment)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn complete_manual_handler<T>(
    State(service): State<Arc<OriginationService<T>>>,
    Path(workflow_id): Path<String>,
) -> Response
where
    T: TrackingStore + 'static,
{
    match service.complete_manual_review(&WorkflowId(workflow_id)).await {
        Ok(assignment) => (StatusCode::OK, axum::Json(assignment)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn reassign_handler<T>(
    State(service): State<Arc<OriginationService<T>>>,
    Path(workflow_id): Path<String>,
) -> Response
where
    T: TrackingStore + 'static,
{
    match service.reassign(&WorkflowId(workflow_id)).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: OrchestrationError) -> Response {
    let status = match &err {
        OrchestrationError::NotFound(_) | OrchestrationError::NoActiveAssignment(_) => {
            StatusCode::NOT_FOUND
        }
        OrchestrationError::InvalidState { .. }
        | OrchestrationError::Tracking(TrackingError::Conflict) => StatusCode::CONFLICT,
        OrchestrationError::Tracking(TrackingError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OrchestrationError::Tracking(_)
        | OrchestrationError::EmptyPlan
        | OrchestrationError::UnknownStages(_) => {
            error!(error = %err, "origination request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
