use axum::{http::StatusCode, Json};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::guard::{ConfigurationError, RawRequest, RouteSpec, RouteTable};
use crate::middleware::auth::CallerIdentity;
use crate::middleware::rate_limit::RateDecision;
use crate::models::{Registry, RegistryData};
use crate::routes::AppState;
use crate::services::plates::normalize_plate;

const CPF_LIMIT_SCOPE: &str = "cortex";
const BATCH_SIZE: usize = 10;

#[derive(Debug, Serialize)]
pub struct RemainingCredit {
    pub remaining_credit: u64,
    pub time_until_reset: u64,
}

pub fn register(table: &mut RouteTable<AppState>) -> Result<(), ConfigurationError> {
    table
        .register(
            RouteSpec::get("/cortex/plate/{plate}")
                .summary("Vehicle registration details for a plate")
                .require_cpf()
                .responds(StatusCode::OK, "Registration details")
                .responds(StatusCode::BAD_REQUEST, "Invalid plate format")
                .responds(StatusCode::TOO_MANY_REQUESTS, "Lookup allowance exhausted")
                .responds(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS, "Lookup refused"),
            get_plate_details,
        )?
        .register(
            RouteSpec::get("/cortex/remaining-credit")
                .summary("Lookups left for the caller's CPF in the current window")
                .require_cpf()
                .responds(StatusCode::OK, "Remaining credit"),
            get_remaining_credit,
        )?;

    Ok(())
}

pub(crate) fn caller_cpf(caller: &CallerIdentity) -> AppResult<&str> {
    caller
        .cpf
        .as_deref()
        .filter(|cpf| !cpf.is_empty())
        .ok_or_else(|| AppError::Unauthorized("A registered CPF is required for this resource.".to_string()))
}

async fn get_plate_details(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Value>> {
    let plate: String = request.path().await?;
    let plate = normalize_plate(&plate)?;

    charged_lookup(&state, &caller, Registry::Plate, &plate)
        .await
        .map(Json)
}

/// Serves `key` from local data when present; otherwise charges the caller's
/// CPF allowance, asks the registration service and keeps the answer.
pub(crate) async fn charged_lookup(
    state: &AppState,
    caller: &CallerIdentity,
    registry: Registry,
    key: &str,
) -> AppResult<Value> {
    let cpf = caller_cpf(caller)?;
    let conn = state.db.connect().map_err(AppError::from)?;

    if let Some(data) = RegistryData::get(&conn, registry, key).await? {
        tracing::debug!("Found {} locally, skipping lookup", key);
        return Ok(data);
    }

    let rule = state.config.cortex_cpf_rate_limit;
    match state
        .cpf_limiter
        .check_and_charge(cpf, CPF_LIMIT_SCOPE, rule)
        .await
    {
        Ok(RateDecision::Allowed { remaining }) => {
            tracing::debug!("Lookup of {} by {}: {} credits left", key, caller.username, remaining);
        }
        Ok(RateDecision::Exceeded { .. }) => {
            tracing::warn!("CPF lookup allowance exhausted for user {}", caller.username);
            return Err(AppError::TooManyRequests("Rate limit exceeded".to_string()));
        }
        Err(e) if state.config.rate_limit_fail_open => {
            tracing::error!("CPF limiter error: {} - allowing lookup", e);
        }
        Err(e) => {
            tracing::error!("CPF limiter error: {} - rejecting lookup", e);
            return Err(AppError::Unavailable("Rate limiter unavailable".to_string()));
        }
    }

    let data = state.cortex.lookup(registry, key, cpf).await?;
    RegistryData::store(&conn, registry, key, &data).await?;

    Ok(data)
}

/// Looks up every key, `BATCH_SIZE` at a time.
pub(crate) async fn charged_lookup_many(
    state: &AppState,
    caller: &CallerIdentity,
    registry: Registry,
    keys: &[String],
) -> AppResult<Vec<Value>> {
    let mut results = Vec::with_capacity(keys.len());
    for batch in keys.chunks(BATCH_SIZE) {
        let found = try_join_all(
            batch
                .iter()
                .map(|key| charged_lookup(state, caller, registry, key)),
        )
        .await?;
        results.extend(found);
    }
    Ok(results)
}

/// Lookups a batch would charge: distinct keys with no local data yet.
pub(crate) async fn credits_needed(
    state: &AppState,
    registry: Registry,
    keys: &[String],
) -> AppResult<usize> {
    let mut unique = keys.to_vec();
    unique.sort();
    unique.dedup();

    let conn = state.db.connect().map_err(AppError::from)?;
    let known = RegistryData::known(&conn, registry, &unique).await?;

    Ok(unique.iter().filter(|key| !known.contains(*key)).count())
}

async fn get_remaining_credit(
    state: AppState,
    caller: CallerIdentity,
    _request: RawRequest,
) -> AppResult<Json<RemainingCredit>> {
    let cpf = caller_cpf(&caller)?;

    let allowance = state
        .cpf_limiter
        .remaining(cpf, CPF_LIMIT_SCOPE, state.config.cortex_cpf_rate_limit)
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    Ok(Json(RemainingCredit {
        remaining_credit: allowance.remaining,
        time_until_reset: allowance.reset_in.as_secs(),
    }))
}
