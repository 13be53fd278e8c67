use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppResult;
use crate::guard::{ConfigurationError, RawRequest, RouteSpec, RouteTable};
use crate::middleware::auth::CallerIdentity;
use crate::models::Registry;
use crate::routes::cortex::{charged_lookup, charged_lookup_many, credits_needed};
use crate::routes::AppState;
use crate::services::documents::normalize_cpf;

#[derive(Debug, Deserialize)]
pub struct PeopleIn {
    pub cpfs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreditsOut {
    pub credits: usize,
}

pub fn register(table: &mut RouteTable<AppState>) -> Result<(), ConfigurationError> {
    table
        .register(
            RouteSpec::post("/people")
                .summary("Registration details for several people")
                .require_cpf()
                .responds(StatusCode::OK, "Registration details, in request order")
                .responds(StatusCode::BAD_REQUEST, "Invalid CPF format")
                .responds(StatusCode::TOO_MANY_REQUESTS, "Lookup allowance exhausted"),
            get_people_details,
        )?
        .register(
            RouteSpec::post("/people/credits")
                .summary("Lookups a batch of CPFs would charge")
                .responds(StatusCode::OK, "Credits needed"),
            get_people_credits,
        )?
        .register(
            RouteSpec::get("/people/{cpf}")
                .summary("Registration details for a person")
                .require_cpf()
                .responds(StatusCode::OK, "Registration details")
                .responds(StatusCode::BAD_REQUEST, "Invalid CPF format")
                .responds(StatusCode::TOO_MANY_REQUESTS, "Lookup allowance exhausted")
                .responds(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS, "Lookup refused"),
            get_person_details,
        )?;

    Ok(())
}

fn normalize_all(cpfs: &[String]) -> AppResult<Vec<String>> {
    cpfs.iter().map(|cpf| normalize_cpf(cpf)).collect()
}

async fn get_person_details(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Value>> {
    let cpf: String = request.path().await?;
    let cpf = normalize_cpf(&cpf)?;

    charged_lookup(&state, &caller, Registry::Person, &cpf)
        .await
        .map(Json)
}

async fn get_people_details(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Vec<Value>>> {
    let input: PeopleIn = request.json()?;
    let cpfs = normalize_all(&input.cpfs)?;

    charged_lookup_many(&state, &caller, Registry::Person, &cpfs)
        .await
        .map(Json)
}

async fn get_people_credits(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<CreditsOut>> {
    let input: PeopleIn = request.json()?;
    let cpfs = normalize_all(&input.cpfs)?;

    let credits = credits_needed(&state, Registry::Person, &cpfs).await?;
    Ok(Json(CreditsOut { credits }))
}
