use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::guard::{ConfigurationError, RawRequest, RouteSpec, RouteTable};
use crate::middleware::auth::CallerIdentity;
use crate::models::ReportHistory;
use crate::routes::AppState;
use crate::services::plates::normalize_plate;

const CORRELATED_PLATES_PATH: &str = "/pdf/correlated-plates";
const CORRELATED_PLATES_KIND: &str = "correlated_plates";
const MULTIPLE_CORRELATED_PLATES_PATH: &str = "/pdf/multiple-correlated-plates";
const MULTIPLE_CORRELATED_PLATES_KIND: &str = "multiple_correlated_plates";
const MAX_WINDOW_MINUTES: u32 = 20;

#[derive(Debug, Serialize, Deserialize)]
pub struct CorrelatedPlatesReportIn {
    #[serde(default)]
    pub report_data: Vec<Value>,
    pub params: Value,
    #[serde(default)]
    pub ranking: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestedPlateData {
    pub plate: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MultipleCorrelatedPlatesIn {
    pub requested_plates_data: Vec<RequestedPlateData>,
    pub n_minutes: u32,
    #[serde(default)]
    pub n_plates: Option<u32>,
    #[serde(default = "default_min_different_targets")]
    pub min_different_targets: u32,
    #[serde(default)]
    pub keep_buses: bool,
    #[serde(default)]
    pub before_after: Option<String>,
    #[serde(default = "default_report_title")]
    pub report_title: String,
}

fn default_min_different_targets() -> u32 {
    1
}

fn default_report_title() -> String {
    "Relatório de Identificação de Veículos".to_string()
}

impl MultipleCorrelatedPlatesIn {
    fn validate(&self) -> AppResult<Vec<String>> {
        if self.requested_plates_data.is_empty() {
            return Err(AppError::Validation("At least one plate is required".to_string()));
        }
        if self.n_minutes == 0 || self.n_minutes > MAX_WINDOW_MINUTES {
            return Err(AppError::Validation(format!(
                "n_minutes must be between 1 and {}",
                MAX_WINDOW_MINUTES
            )));
        }
        if self.n_plates == Some(0) {
            return Err(AppError::Validation("n_plates must be greater than 0".to_string()));
        }
        if self.min_different_targets == 0 {
            return Err(AppError::Validation(
                "min_different_targets must be greater than 0".to_string(),
            ));
        }
        if let Some(side) = self.before_after.as_deref() {
            if side != "before" && side != "after" {
                return Err(AppError::Validation(
                    "before_after must be \"before\" or \"after\"".to_string(),
                ));
            }
        }

        self.requested_plates_data
            .iter()
            .map(|requested| {
                if requested.start >= requested.end {
                    return Err(AppError::Validation(format!(
                        "start must precede end for plate {}",
                        requested.plate
                    )));
                }
                normalize_plate(&requested.plate)
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportHistoryQuery {
    pub report_id: String,
}

pub fn register(table: &mut RouteTable<AppState>) -> Result<(), ConfigurationError> {
    table
        .register(
            RouteSpec::post(CORRELATED_PLATES_PATH)
                .summary("Renders the correlated plates report")
                .report(CORRELATED_PLATES_KIND)
                .responds(StatusCode::OK, "PDF document"),
            generate_correlated_plates,
        )?
        .register(
            RouteSpec::get("/pdf/correlated-plates/history")
                .summary("Parameters a correlated plates report was generated with")
                .responds(StatusCode::OK, "Report found")
                .responds(StatusCode::NOT_FOUND, "Report not found"),
            get_correlated_plates_history,
        )?
        .register(
            RouteSpec::post(MULTIPLE_CORRELATED_PLATES_PATH)
                .summary("Renders the report for several plates seen together")
                .report(MULTIPLE_CORRELATED_PLATES_KIND)
                .responds(StatusCode::OK, "PDF document")
                .responds(StatusCode::UNPROCESSABLE_ENTITY, "Invalid search parameters"),
            generate_multiple_correlated_plates,
        )?
        .register(
            RouteSpec::get("/pdf/multiple-correlated-plates/history")
                .summary("Parameters a multiple correlated plates report was generated with")
                .responds(StatusCode::OK, "Report found")
                .responds(StatusCode::NOT_FOUND, "Report not found"),
            get_multiple_correlated_plates_history,
        )?;

    Ok(())
}

async fn generate_correlated_plates(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Response> {
    let input: CorrelatedPlatesReportIn = request.json()?;
    let report_id = request
        .report_id()
        .ok_or_else(|| AppError::Internal("Report id was not allocated".to_string()))?;

    let context = json!({
        "report_id": report_id,
        "requested_by": caller.display_name.as_deref().unwrap_or(&caller.username),
        "report_data": input.report_data,
        "params": input.params,
        "ranking": input.ranking,
    });

    let pdf = state
        .renderer
        .render(CORRELATED_PLATES_KIND, report_id, &context)
        .await?;

    Ok(pdf_attachment(report_id, pdf))
}

async fn generate_multiple_correlated_plates(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Response> {
    let input: MultipleCorrelatedPlatesIn = request.json()?;
    let plates = input.validate()?;
    let report_id = request
        .report_id()
        .ok_or_else(|| AppError::Internal("Report id was not allocated".to_string()))?;

    let warehouse = &state.warehouse;
    let detections = try_join_all(input.requested_plates_data.iter().zip(&plates).map(
        |(requested, plate)| async move {
            let locations = warehouse
                .positions(plate, requested.start, requested.end)
                .await?;
            Ok::<_, AppError>(json!({ "plate": plate, "detections": locations }))
        },
    ))
    .await?;

    let no_detections = detections
        .iter()
        .all(|entry| entry["detections"].as_array().map_or(true, |d| d.is_empty()));
    let start = input.requested_plates_data.iter().map(|p| p.start).min();
    let end = input.requested_plates_data.iter().map(|p| p.end).max();

    let context = json!({
        "report_id": report_id,
        "report_title": input.report_title,
        "requested_by": caller.display_name.as_deref().unwrap_or(&caller.username),
        "no_detections": no_detections,
        "search_parameters": {
            "plates": plates,
            "start_time": start,
            "end_time": end,
            "n_minutes": input.n_minutes,
            "n_plates": input.n_plates,
            "min_different_targets": input.min_different_targets,
            "keep_buses": input.keep_buses,
            "before_after": input.before_after,
        },
        "detections": detections,
    });

    let pdf = state
        .renderer
        .render(MULTIPLE_CORRELATED_PLATES_KIND, report_id, &context)
        .await?;

    Ok(pdf_attachment(report_id, pdf))
}

fn pdf_attachment(report_id: &str, pdf: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}.pdf", report_id),
            ),
        ],
        pdf,
    )
        .into_response()
}

async fn get_correlated_plates_history(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Value>> {
    find_report(&state, &request, CORRELATED_PLATES_PATH).await
}

async fn get_multiple_correlated_plates_history(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Value>> {
    find_report(&state, &request, MULTIPLE_CORRELATED_PLATES_PATH).await
}

async fn find_report(state: &AppState, request: &RawRequest, path: &str) -> AppResult<Json<Value>> {
    let query: ReportHistoryQuery = request.query()?;
    let conn = state.db.connect().map_err(AppError::from)?;

    let report = ReportHistory::find(&conn, path, &query.report_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Report not found".to_string()))?;

    Ok(Json(json!({
        "status_code": 200,
        "detail": "Report found",
        "report_history": report,
    })))
}
