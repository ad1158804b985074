use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse},
    routing::{delete, get, post},
};
use tracing::info;

use super::{AddressRequest, ApiError, ReportResponse, ValidateResponse};
use crate::address;
use crate::report::Report;
use crate::server::AppState;
use crate::status::StatusReport;

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/validate-address", post(validate_address))
        .route("/generate-report", post(generate_report))
        .route("/report-status/{id}", get(report_status))
        .route("/view-report/{id}", get(view_report))
        .route("/export-report/{id}", get(export_report))
        .route("/export-pdf/{id}", get(export_pdf))
        .route("/retry-report/{id}", post(retry_report))
        .route("/clear-report/{id}", delete(clear_report))
}

async fn validate_address(
    payload: Result<Json<AddressRequest>, JsonRejection>,
) -> (StatusCode, Json<ValidateResponse>) {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            let response = ValidateResponse {
                valid: false,
                formatted_address: None,
                message: Some(rejection.body_text()),
            };
            return (StatusCode::BAD_REQUEST, Json(response));
        }
    };

    let response = match address::validate(&req.address) {
        Ok(validated) => ValidateResponse {
            valid: true,
            formatted_address: Some(validated.formatted),
            message: None,
        },
        Err(err) => ValidateResponse {
            valid: false,
            formatted_address: None,
            message: Some(err.to_string()),
        },
    };
    (StatusCode::OK, Json(response))
}

async fn generate_report(
    State(state): State<AppState>,
    payload: Result<Json<AddressRequest>, JsonRejection>,
) -> Result<Json<ReportResponse>, ApiError> {
    let Json(req) = payload?;
    let id = state.orchestrator.submit(&req.address)?;
    Ok(Json(ReportResponse::ok(
        Some(id),
        "Report generation started",
    )))
}

async fn report_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<StatusReport>) {
    let report = state.status.status(&id);
    let code = if report.success {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (code, Json(report))
}

async fn view_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, ApiError> {
    let job = state.orchestrator.store().get(&id)?;
    let report = Report::from_job(&job)?;
    Ok(Html(report.to_html()))
}

async fn export_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.store().get(&id)?;
    let report = Report::from_job(&job)?;
    let disposition = format!("attachment; filename=\"{}.md\"", report.file_stem());
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.to_markdown(),
    ))
}

async fn export_pdf(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.store().get(&id)?;
    let report = Report::from_job(&job)?;
    let pdf = report.to_pdf()?;
    let disposition = format!("attachment; filename=\"{}.pdf\"", report.file_stem());
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf,
    ))
}

async fn retry_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportResponse>, ApiError> {
    let new_id = state.orchestrator.retry(&id)?;
    Ok(Json(ReportResponse::ok(
        Some(new_id),
        "Report generation restarted",
    )))
}

async fn clear_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportResponse>, ApiError> {
    if state.orchestrator.store().evict(&id)? {
        info!(job_id = %id, "report cleared");
        Ok(Json(ReportResponse::ok(None, "Report cleared")))
    } else {
        Err(ApiError::NotFound("Report not found".to_string()))
    }
}
