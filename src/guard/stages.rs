use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, Outcome, ReportAuditRecord};
use crate::config::RateLimitRule;
use crate::error::AppError;
use crate::guard::handler::GuardedHandler;
use crate::guard::pipeline::{Flow, GuardContext, Stage};
use crate::middleware::auth::{bearer_token, AuthFailure, AuthResolver};
use crate::middleware::rate_limit::{RateDecision, RateLimiter};
use crate::services::report_id;

/// Resolves the caller and enforces the route's role and CPF requirements.
pub struct AuthStage {
    resolver: Arc<dyn AuthResolver>,
}

impl AuthStage {
    pub fn new(resolver: Arc<dyn AuthResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<S> Stage<S> for AuthStage
where
    S: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut GuardContext<S>) -> Flow {
        let resolved = match ctx.request.as_ref().map(|r| bearer_token(r.headers())) {
            Some(Ok(token)) => self.resolver.resolve(token).await,
            Some(Err(e)) => Err(e),
            None => Err(AuthFailure::MissingCredential),
        };

        let caller = match resolved {
            Ok(caller) => caller,
            Err(e) => {
                tracing::debug!("Rejected {}: {}", ctx.route.key(), e);
                return Flow::Respond(e.into_response());
            }
        };

        if let Some(role) = ctx.route.roles.iter().find(|r| !caller.has_role(**r)) {
            tracing::warn!("User {} lacks role {:?} for {}", caller.username, role, ctx.route.key());
            return Flow::Respond(AuthFailure::InsufficientRole(*role).into_response());
        }

        if ctx.route.requires_cpf && caller.cpf.as_deref().map_or(true, str::is_empty) {
            tracing::warn!("User {} has no CPF for {}", caller.username, ctx.route.key());
            return Flow::Respond(AuthFailure::MissingCpf.into_response());
        }

        ctx.caller = Some(caller);
        Flow::Continue
    }
}

/// Charges the caller's fixed window for this route.
pub struct RateLimitStage {
    limiter: Arc<dyn RateLimiter>,
    default_limit: RateLimitRule,
    fail_open: bool,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<dyn RateLimiter>, default_limit: RateLimitRule, fail_open: bool) -> Self {
        Self {
            limiter,
            default_limit,
            fail_open,
        }
    }
}

#[async_trait]
impl<S> Stage<S> for RateLimitStage
where
    S: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut GuardContext<S>) -> Flow {
        let Some(caller) = ctx.caller.as_ref() else {
            return Flow::Respond(AuthFailure::MissingCredential.into_response());
        };

        let rule = ctx.route.rate_limit.unwrap_or(self.default_limit);
        let key = ctx.route.key();

        match self.limiter.check_and_charge(&caller.id, &key, rule).await {
            Ok(RateDecision::Allowed { remaining }) => {
                tracing::debug!("{} for {}: {} requests left in window", key, caller.username, remaining);
                Flow::Continue
            }
            Ok(RateDecision::Exceeded { retry_after }) => {
                tracing::warn!("Rate limit exceeded for user {} on {}", caller.username, key);
                ctx.outcome = Some((Outcome::RateLimited, StatusCode::TOO_MANY_REQUESTS));

                let mut response =
                    AppError::TooManyRequests("Rate limit exceeded".to_string()).into_response();
                let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                Flow::Respond(response)
            }
            Err(e) if self.fail_open => {
                tracing::error!("Rate limiter error on {}: {} - allowing request", key, e);
                Flow::Continue
            }
            Err(e) => {
                tracing::error!("Rate limiter error on {}: {} - rejecting request", key, e);
                ctx.outcome = Some((Outcome::Failure, StatusCode::SERVICE_UNAVAILABLE));
                Flow::Respond(
                    AppError::Unavailable("Rate limiter unavailable".to_string()).into_response(),
                )
            }
        }
    }
}

/// Invokes the route body with the resolved caller and the original request.
pub struct HandlerStage<S> {
    handler: Arc<dyn GuardedHandler<S>>,
}

impl<S> HandlerStage<S> {
    pub fn new(handler: Arc<dyn GuardedHandler<S>>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<S> Stage<S> for HandlerStage<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut GuardContext<S>) -> Flow {
        let (Some(caller), Some(mut request)) = (ctx.caller.clone(), ctx.request.take()) else {
            return Flow::Respond(
                AppError::Internal("Handler reached without caller".to_string()).into_response(),
            );
        };

        if ctx.route.report_kind.is_some() {
            let id = report_id::generate();
            request.set_report_id(id.clone());
            ctx.report_id = Some(id);
        }

        let call = self.handler.call(ctx.state.clone(), caller, request);

        // A panicking handler is reported as a 500 and still audited.
        let response = match tokio::spawn(call).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Handler for {} failed: {}", ctx.route.key(), e);
                AppError::Internal("Request failed".to_string()).into_response()
            }
        };

        let status = response.status();
        let outcome = if status.is_success() || status.is_redirection() {
            Outcome::Success
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Outcome::RateLimited
        } else {
            Outcome::Failure
        };
        ctx.outcome = Some((outcome, status));

        Flow::Respond(response)
    }
}

/// Writes the audit trail for every call that got past authentication.
pub struct AuditStage {
    sink: Arc<dyn AuditSink>,
}

impl AuditStage {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> Stage<S> for AuditStage
where
    S: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut GuardContext<S>) -> Flow {
        let Some(caller) = ctx.caller.as_ref() else {
            return Flow::Continue;
        };

        let (outcome, status) = ctx
            .outcome
            .unwrap_or((Outcome::Failure, StatusCode::INTERNAL_SERVER_ERROR));

        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            caller_id: caller.id.clone(),
            method: ctx.method.to_string(),
            path: ctx.path.clone(),
            query_params: ctx.query_params.clone(),
            body: ctx.body.clone(),
            status_code: status.as_u16(),
            outcome,
            report_id: ctx.report_id.clone(),
            timestamp: ctx.started_at,
        };

        if let Err(e) = self.sink.record(record).await {
            tracing::error!(
                "Failed to write audit record for {} by {}: {}",
                ctx.route.key(),
                caller.username,
                e
            );
        }

        if let (Some(kind), Some(report_id), Outcome::Success) =
            (ctx.route.report_kind.as_ref(), ctx.report_id.as_ref(), outcome)
        {
            let report = ReportAuditRecord {
                id: Uuid::new_v4().to_string(),
                caller_id: caller.id.clone(),
                method: ctx.method.to_string(),
                path: ctx.route.path.clone(),
                kind: kind.clone(),
                report_id: report_id.clone(),
                query_params: ctx.query_params.clone(),
                body: ctx.body.clone(),
                timestamp: ctx.started_at,
            };

            if let Err(e) = self.sink.record_report(report).await {
                tracing::error!("Failed to write report history for {}: {}", report_id, e);
            }
        }

        Flow::Continue
    }
}
