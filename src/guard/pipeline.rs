use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;

use crate::audit::Outcome;
use crate::error::AppError;
use crate::guard::handler::GuardedHandler;
use crate::guard::route::{Guard, RouteSpec};
use crate::guard::stages::{AuditStage, AuthStage, HandlerStage, RateLimitStage};
use crate::guard::RawRequest;
use crate::middleware::auth::CallerIdentity;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Everything the stages know about one guarded call.
pub struct GuardContext<S> {
    pub route: Arc<RouteSpec>,
    pub state: S,
    pub method: Method,
    pub path: String,
    pub query_params: Value,
    pub body: Option<Value>,
    pub request: Option<RawRequest>,
    pub caller: Option<CallerIdentity>,
    pub report_id: Option<String>,
    pub outcome: Option<(Outcome, StatusCode)>,
    pub started_at: DateTime<Utc>,
}

impl<S> GuardContext<S> {
    pub fn new(route: Arc<RouteSpec>, state: S, request: RawRequest) -> Self {
        Self {
            route,
            state,
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query_params: request.query_value(),
            body: request.body_value(),
            request: Some(request),
            caller: None,
            report_id: None,
            outcome: None,
            started_at: Utc::now(),
        }
    }
}

pub enum Flow {
    Continue,
    Respond(Response),
}

/// One step of the guarded request pipeline.
#[async_trait]
pub trait Stage<S>: Send + Sync {
    async fn handle(&self, ctx: &mut GuardContext<S>) -> Flow;
}

/// Fixed stage sequence for a single route.
///
/// `stages` run in order until one responds; `finally` always runs afterwards,
/// whatever happened before it.
pub struct Pipeline<S> {
    route: Arc<RouteSpec>,
    stages: Vec<Box<dyn Stage<S>>>,
    finally: Vec<Box<dyn Stage<S>>>,
}

impl<S> Pipeline<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(guard: &Guard, route: RouteSpec, handler: Arc<dyn GuardedHandler<S>>) -> Self {
        Self {
            route: Arc::new(route),
            stages: vec![
                Box::new(AuthStage::new(guard.auth.clone())),
                Box::new(RateLimitStage::new(
                    guard.limiter.clone(),
                    guard.default_limit,
                    guard.fail_open,
                )),
                Box::new(HandlerStage::new(handler)),
            ],
            finally: vec![Box::new(AuditStage::new(guard.audit.clone()))],
        }
    }

    pub async fn run(&self, mut ctx: GuardContext<S>) -> Response {
        let mut response = None;

        for stage in &self.stages {
            if let Flow::Respond(r) = stage.handle(&mut ctx).await {
                response = Some(r);
                break;
            }
        }

        for stage in &self.finally {
            stage.handle(&mut ctx).await;
        }

        response.unwrap_or_else(|| {
            AppError::Internal("Guarded route produced no response".to_string()).into_response()
        })
    }

    /// Runs the pipeline on its own task so a dropped connection does not cut the audit write short.
    pub async fn dispatch(self: Arc<Self>, state: S, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = match read_body(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(BodyError::TooLarge) => {
                tracing::debug!("Body over {} bytes for {}", MAX_BODY_BYTES, self.route.key());
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
            Err(BodyError::Interrupted(e)) => {
                tracing::debug!("Failed to read body for {}: {}", self.route.key(), e);
                return AppError::BadRequest("Failed to read request body".to_string())
                    .into_response();
            }
        };

        let ctx = GuardContext::new(self.route.clone(), state, RawRequest::new(parts, body));
        let key = self.route.key();

        match tokio::spawn(async move { self.run(ctx).await }).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Guarded route {} task failed: {}", key, e);
                AppError::Internal("Request failed".to_string()).into_response()
            }
        }
    }
}

enum BodyError {
    TooLarge,
    Interrupted(axum::Error),
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Interrupted)?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buf))
}
