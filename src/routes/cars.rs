use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::guard::{ConfigurationError, RawRequest, RouteSpec, RouteTable};
use crate::middleware::auth::{CallerIdentity, Role};
use crate::models::{MonitoredPlate, Page, PageParams};
use crate::routes::AppState;
use crate::services::path::{build_paths, CarPath, MAX_POINTS_PER_SEGMENT};
use crate::services::plates::normalize_plate;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(alias = "placa")]
    pub plate: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default = "default_max_time_interval")]
    pub max_time_interval: i64,
}

fn default_max_time_interval() -> i64 {
    60 * 60
}

#[derive(Debug, Deserialize)]
pub struct MonitoredPlateIn {
    pub plate: String,
}

pub fn register(table: &mut RouteTable<AppState>) -> Result<(), ConfigurationError> {
    table
        .register(
            RouteSpec::get("/cars/path")
                .summary("Reconstructs the trips of a vehicle")
                .responds(StatusCode::OK, "Trips split into map segments")
                .responds(StatusCode::BAD_REQUEST, "Invalid plate format"),
            get_car_path,
        )?
        .register(
            RouteSpec::get("/cars/monitored")
                .summary("Lists monitored plates")
                .responds(StatusCode::OK, "Page of monitored plates"),
            list_monitored_plates,
        )?
        .register(
            RouteSpec::post("/cars/monitored")
                .summary("Adds a plate to the monitored list")
                .require(Role::Admin)
                .responds(StatusCode::OK, "Monitored plate")
                .responds(StatusCode::CONFLICT, "Plate already monitored"),
            create_monitored_plate,
        )?
        .register(
            RouteSpec::get("/cars/monitored/{plate}")
                .summary("Gets a monitored plate")
                .require(Role::Admin)
                .responds(StatusCode::OK, "Monitored plate")
                .responds(StatusCode::NOT_FOUND, "Plate not found"),
            get_monitored_plate,
        )?
        .register(
            RouteSpec::delete("/cars/monitored/{plate}")
                .summary("Removes a plate from the monitored list")
                .require(Role::Admin)
                .responds(StatusCode::OK, "Removed plate")
                .responds(StatusCode::NOT_FOUND, "Plate not found"),
            delete_monitored_plate,
        )?;

    Ok(())
}

async fn get_car_path(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Vec<CarPath>>> {
    let query: PathQuery = request.query()?;
    let plate = normalize_plate(&query.plate)?;

    if query.end_time <= query.start_time {
        return Err(AppError::Validation("end_time must be after start_time".to_string()));
    }
    if query.max_time_interval <= 0 {
        return Err(AppError::Validation("max_time_interval must be positive".to_string()));
    }

    let cache_key = format!(
        "car_path:{}:{}:{}:{}",
        plate,
        query.start_time.timestamp(),
        query.end_time.timestamp(),
        query.max_time_interval
    );

    if let Some(cache) = &state.cache {
        if let Some(paths) = cache.get_json::<Vec<CarPath>>(&cache_key).await {
            tracing::debug!("Serving cached path for {}", plate);
            return Ok(Json(paths));
        }
    }

    let locations = state
        .warehouse
        .positions(&plate, query.start_time, query.end_time)
        .await?;

    let paths = build_paths(locations, query.max_time_interval, MAX_POINTS_PER_SEGMENT);

    if let Some(cache) = &state.cache {
        cache
            .set_json(&cache_key, &paths, state.config.cache_car_path_ttl)
            .await;
    }

    Ok(Json(paths))
}

async fn list_monitored_plates(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Page<MonitoredPlate>>> {
    let params: PageParams = request.query()?;
    let conn = state.db.connect().map_err(AppError::from)?;

    let items = MonitoredPlate::list(&conn, params.limit(), params.offset()).await?;
    let total = MonitoredPlate::count(&conn).await?;

    Ok(Json(Page::new(items, total, params)))
}

async fn create_monitored_plate(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<MonitoredPlate>> {
    let input: MonitoredPlateIn = request.json()?;
    let plate = normalize_plate(&input.plate)?;

    let conn = state.db.connect().map_err(AppError::from)?;
    let monitored = MonitoredPlate::create(&conn, &plate).await?;

    tracing::info!("User {} started monitoring {}", caller.username, plate);

    Ok(Json(monitored))
}

async fn get_monitored_plate(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<MonitoredPlate>> {
    let plate: String = request.path().await?;
    let conn = state.db.connect().map_err(AppError::from)?;

    let monitored = MonitoredPlate::find_by_plate(&conn, &plate.to_uppercase())
        .await?
        .ok_or_else(|| AppError::NotFound("Plate not found".to_string()))?;

    Ok(Json(monitored))
}

async fn delete_monitored_plate(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<MonitoredPlate>> {
    let plate: String = request.path().await?;
    let conn = state.db.connect().map_err(AppError::from)?;

    let removed = MonitoredPlate::delete(&conn, &plate.to_uppercase()).await?;

    tracing::info!("User {} stopped monitoring {}", caller.username, removed.plate);

    Ok(Json(removed))
}
