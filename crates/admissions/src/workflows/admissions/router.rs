use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::catalog::{Progression, TransitionError};
use super::domain::{AdmissionStage, ApplicationId, ApplicationSubmission, InstallmentChoice};
use super::fees::{FeeAssignmentError, FeeAssignmentResult};
use super::repository::{ApplicationRepository, FeeStructureCatalog, RepositoryError};
use super::service::{AdmissionsError, AdmissionsService, ApplicationStatusView};

/// Router builder exposing intake, advancement, and batch progression endpoints.
pub fn admissions_router<R, F>(service: Arc<AdmissionsService<R, F>>) -> Router
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    Router::new()
        .route(
            "/api/v1/admissions/applications",
            post(submit_handler::<R, F>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id",
            get(status_handler::<R, F>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/advance",
            post(advance_handler::<R, F>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/fees",
            post(fees_handler::<R, F>),
        )
        .route(
            "/api/v1/admissions/batch/progress",
            post(batch_handler::<R, F>),
        )
        .route("/api/v1/admissions/stages", get(stages_handler::<R, F>))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AdvanceRequest {
    #[serde(default)]
    pub(crate) installment_choice: Option<InstallmentChoice>,
    /// When present the advance only succeeds if this is the legal next stage.
    #[serde(default)]
    pub(crate) target_stage: Option<AdmissionStage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignFeesRequest {
    /// Payment key such as `deposit`; any other key is accepted and bills nothing.
    pub(crate) stage: String,
    #[serde(default)]
    pub(crate) installment_choice: Option<InstallmentChoice>,
}

#[derive(Debug, Serialize)]
struct AssignFeesResponse {
    #[serde(flatten)]
    result: FeeAssignmentResult,
    status: ApplicationStatusView,
}

#[derive(Debug, Serialize)]
struct AdvanceResponse {
    previous_stage: AdmissionStage,
    status: ApplicationStatusView,
    invoice_ids: Vec<String>,
    fee_total: u64,
}

#[derive(Debug, Serialize)]
struct StageView {
    stage: AdmissionStage,
    title: &'static str,
    next: Option<AdmissionStage>,
    progression: Progression,
}

pub(crate) async fn submit_handler<R, F>(
    State(service): State<Arc<AdmissionsService<R, F>>>,
    axum::Json(submission): axum::Json<ApplicationSubmission>,
) -> Response
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    match service.submit(submission).await {
        Ok(application) => {
            let view = service.status_view(&application);
            (StatusCode::ACCEPTED, axum::Json(view)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<R, F>(
    State(service): State<Arc<AdmissionsService<R, F>>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    let id = ApplicationId(application_id);
    match service.get(&id).await {
        Ok(application) => {
            let view = service.status_view(&application);
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn advance_handler<R, F>(
    State(service): State<Arc<AdmissionsService<R, F>>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<AdvanceRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    let id = ApplicationId(application_id);
    let outcome = match request.target_stage {
        Some(target) => {
            service
                .transition_to(&id, target, request.installment_choice)
                .await
        }
        None => service.advance_one(&id, request.installment_choice).await,
    };

    match outcome {
        Ok(outcome) => {
            let (invoice_ids, fee_total) = outcome
                .assignment
                .as_ref()
                .map(|fees| (fees.invoice_ids(), fees.total))
                .unwrap_or_default();
            let body = AdvanceResponse {
                previous_stage: outcome.previous_stage,
                status: service.status_view(&outcome.application),
                invoice_ids,
                fee_total,
            };
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn fees_handler<R, F>(
    State(service): State<Arc<AdmissionsService<R, F>>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<AssignFeesRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    let id = ApplicationId(application_id);
    let result = match service
        .assign_fees_for_stage(&id, &request.stage, request.installment_choice)
        .await
    {
        Ok(result) => result,
        Err(err) => return error_response(err),
    };

    match service.get(&id).await {
        Ok(application) => {
            let body = AssignFeesResponse {
                result,
                status: service.status_view(&application),
            };
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn batch_handler<R, F>(
    State(service): State<Arc<AdmissionsService<R, F>>>,
) -> Response
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    match service.process_pending().await {
        Ok(report) => (StatusCode::OK, axum::Json(report.summary())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn stages_handler<R, F>(
    State(service): State<Arc<AdmissionsService<R, F>>>,
) -> Response
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    let stages: Vec<StageView> = service
        .catalog()
        .ordered()
        .into_iter()
        .map(|definition| StageView {
            stage: definition.stage,
            title: definition.title,
            next: definition.next,
            progression: definition.progression,
        })
        .collect();
    (StatusCode::OK, axum::Json(stages)).into_response()
}

/// HTTP status for a service error; the single mapping used by every handler.
pub(crate) fn status_for(err: &AdmissionsError) -> StatusCode {
    match err {
        AdmissionsError::Intake(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AdmissionsError::Transition(TransitionError::UnknownStage(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AdmissionsError::Transition(_) | AdmissionsError::ConcurrentModification { .. } => {
            StatusCode::CONFLICT
        }
        AdmissionsError::Fee(
            FeeAssignmentError::NoFeeStructure { .. }
            | FeeAssignmentError::NoApplicationFeeHead { .. }
            | FeeAssignmentError::NoBillableFeeHeads { .. },
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        AdmissionsError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        AdmissionsError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        AdmissionsError::Fee(_) | AdmissionsError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: AdmissionsError) -> Response {
    let payload = json!({ "error": err.to_string() });
    (status_for(&err), axum::Json(payload)).into_response()
}
