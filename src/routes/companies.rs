use axum::{http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppResult;
use crate::guard::{ConfigurationError, RawRequest, RouteSpec, RouteTable};
use crate::middleware::auth::CallerIdentity;
use crate::models::Registry;
use crate::routes::cortex::{charged_lookup, charged_lookup_many, credits_needed};
use crate::routes::people::CreditsOut;
use crate::routes::AppState;
use crate::services::documents::normalize_cnpj;

#[derive(Debug, Deserialize)]
pub struct CompaniesIn {
    pub cnpjs: Vec<String>,
}

pub fn register(table: &mut RouteTable<AppState>) -> Result<(), ConfigurationError> {
    table
        .register(
            RouteSpec::post("/companies")
                .summary("Registration details for several companies")
                .require_cpf()
                .responds(StatusCode::OK, "Registration details, in request order")
                .responds(StatusCode::BAD_REQUEST, "Invalid CNPJ format")
                .responds(StatusCode::TOO_MANY_REQUESTS, "Lookup allowance exhausted"),
            get_companies_details,
        )?
        .register(
            RouteSpec::post("/companies/credits")
                .summary("Lookups a batch of CNPJs would charge")
                .responds(StatusCode::OK, "Credits needed"),
            get_companies_credits,
        )?
        .register(
            RouteSpec::get("/companies/{cnpj}")
                .summary("Registration details for a company")
                .require_cpf()
                .responds(StatusCode::OK, "Registration details")
                .responds(StatusCode::BAD_REQUEST, "Invalid CNPJ format")
                .responds(StatusCode::TOO_MANY_REQUESTS, "Lookup allowance exhausted")
                .responds(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS, "Lookup refused"),
            get_company_details,
        )?;

    Ok(())
}

async fn get_company_details(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Value>> {
    let cnpj: String = request.path().await?;
    let cnpj = normalize_cnpj(&cnpj)?;

    charged_lookup(&state, &caller, Registry::Company, &cnpj)
        .await
        .map(Json)
}

async fn get_companies_details(
    state: AppState,
    caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<Vec<Value>>> {
    let input: CompaniesIn = request.json()?;
    let cnpjs = input
        .cnpjs
        .iter()
        .map(|cnpj| normalize_cnpj(cnpj))
        .collect::<AppResult<Vec<_>>>()?;

    charged_lookup_many(&state, &caller, Registry::Company, &cnpjs)
        .await
        .map(Json)
}

async fn get_companies_credits(
    state: AppState,
    _caller: CallerIdentity,
    request: RawRequest,
) -> AppResult<Json<CreditsOut>> {
    let input: CompaniesIn = request.json()?;
    let cnpjs = input
        .cnpjs
        .iter()
        .map(|cnpj| normalize_cnpj(cnpj))
        .collect::<AppResult<Vec<_>>>()?;

    let credits = credits_needed(&state, Registry::Company, &cnpjs).await?;
    Ok(Json(CreditsOut { credits }))
}
