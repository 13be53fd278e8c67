use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;
use crate::audit::{MemoryAuditSink, Outcome};
use crate::config::RateLimitRule;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{test_identity, CallerIdentity, Role, Roles, StaticAuthResolver};
use crate::middleware::rate_limit::{Allowance, RateDecision, RateLimitError, RateLimiter};
use crate::services::rate_limiter::MemoryRateLimiter;

const USER: Roles = Roles {
    user: true,
    agent: false,
    admin: false,
};

struct Harness {
    audit: Arc<MemoryAuditSink>,
    limiter: Arc<MemoryRateLimiter>,
    guard: Guard,
}

fn harness() -> Harness {
    let mut no_cpf = test_identity("carol", USER);
    no_cpf.cpf = None;

    let resolver = StaticAuthResolver::new()
        .with("alice-token", test_identity("alice", USER))
        .with("bob-token", test_identity("bob", USER))
        .with(
            "admin-token",
            test_identity(
                "root",
                Roles {
                    user: true,
                    agent: false,
                    admin: true,
                },
            ),
        )
        .with("carol-token", no_cpf);

    let audit = Arc::new(MemoryAuditSink::new());
    let limiter = Arc::new(MemoryRateLimiter::new());
    let guard = Guard::new(
        Arc::new(resolver),
        limiter.clone(),
        audit.clone(),
        RateLimitRule::per_minute(100),
    );

    Harness {
        audit,
        limiter,
        guard,
    }
}

fn counting(calls: Arc<AtomicUsize>) -> impl GuardedHandler<()> {
    move |_: (), caller: CallerIdentity, _request: RawRequest| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AppError>(Json(json!({ "caller": caller.id })))
        }
    }
}

async fn not_found(_: (), _caller: CallerIdentity, _request: RawRequest) -> AppResult<Json<Value>> {
    Err(AppError::NotFound("Plate not found".to_string()))
}

fn single_route(guard: Guard, spec: RouteSpec, handler: impl GuardedHandler<()>) -> Router {
    let mut table = RouteTable::new(guard);
    table.register(spec, handler).unwrap();
    table.finalize().unwrap().router
}

async fn send(router: &Router, method: Method, uri: &str, token: Option<&str>) -> Response {
    send_body(router, method, uri, token, Body::empty()).await
}

async fn send_body(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Body,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn successful_call_is_audited_once() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let router = single_route(
        h.guard.clone(),
        RouteSpec::get("/cars/monitored").rate_limit(RateLimitRule::per_minute(5)),
        counting(calls.clone()),
    );

    for _ in 0..2 {
        send(&router, Method::GET, "/cars/monitored", Some("alice-token")).await;
    }
    let response = send(&router, Method::GET, "/cars/monitored", Some("alice-token")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "caller": "alice" }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let records = h.audit.records();
    assert_eq!(records.len(), 3);
    let last = records.last().unwrap();
    assert_eq!(last.caller_id, "alice");
    assert_eq!(last.method, "GET");
    assert_eq!(last.path, "/cars/monitored");
    assert_eq!(last.status_code, 200);
    assert_eq!(last.outcome, Outcome::Success);
    assert!(h.audit.reports().is_empty());
}

#[tokio::test]
async fn failed_authentication_is_neither_charged_nor_audited() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let rule = RateLimitRule::per_minute(5);
    let router = single_route(
        h.guard.clone(),
        RouteSpec::get("/cars/path").rate_limit(rule),
        counting(calls.clone()),
    );

    let expired = send(&router, Method::GET, "/cars/path", Some("expired")).await;
    assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(expired).await, json!({ "detail": "Token is expired" }));

    let missing = send(&router, Method::GET, "/cars/path", None).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let unknown = send(&router, Method::GET, "/cars/path", Some("forged")).await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.audit.records().is_empty());

    let allowance = h.limiter.remaining("alice", "GET /cars/path", rule).await.unwrap();
    assert_eq!(allowance.remaining, 5);
}

#[tokio::test]
async fn call_over_the_ceiling_is_rejected_and_audited() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let router = single_route(
        h.guard.clone(),
        RouteSpec::get("/cars/path").rate_limit(RateLimitRule::per_minute(5)),
        counting(calls.clone()),
    );

    for _ in 0..5 {
        let ok = send(&router, Method::GET, "/cars/path", Some("alice-token")).await;
        assert_eq!(ok.status(), StatusCode::OK);
    }

    let limited = send(&router, Method::GET, "/cars/path", Some("alice-token")).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(json_body(limited).await, json!({ "detail": "Rate limit exceeded" }));

    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let records = h.audit.records();
    assert_eq!(records.len(), 6);
    assert_eq!(records[5].outcome, Outcome::RateLimited);
    assert_eq!(records[5].status_code, 429);

    // Another caller has their own window.
    let other = send(&router, Method::GET, "/cars/path", Some("bob-token")).await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn handler_failure_passes_through_and_is_audited() {
    let h = harness();
    let router = single_route(
        h.guard.clone(),
        RouteSpec::get("/cars/monitored/{plate}"),
        not_found,
    );

    let response = send(&router, Method::GET, "/cars/monitored/ABC1D23", Some("alice-token")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await, json!({ "detail": "Plate not found" }));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Failure);
    assert_eq!(records[0].status_code, 404);
    assert_eq!(records[0].path, "/cars/monitored/ABC1D23");
}

#[tokio::test]
async fn audit_outage_does_not_change_the_response() {
    let h = harness();
    h.audit.set_unreachable(true);
    let calls = Arc::new(AtomicUsize::new(0));
    let router = single_route(h.guard.clone(), RouteSpec::get("/users/me"), counting(calls.clone()));

    let response = send(&router, Method::GET, "/users/me", Some("alice-token")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "caller": "alice" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.audit.records().is_empty());
}

async fn render_report(_: (), _caller: CallerIdentity, request: RawRequest) -> AppResult<Json<Value>> {
    let report_id = request
        .report_id()
        .ok_or_else(|| AppError::Internal("no report id".to_string()))?;
    Ok(Json(json!({ "report_id": report_id })))
}

#[tokio::test]
async fn report_route_writes_both_records_with_the_same_id() {
    let h = harness();
    let router = single_route(
        h.guard.clone(),
        RouteSpec::post("/pdf/correlated-plates").report("correlated_plates"),
        render_report,
    );

    let response = send_body(
        &router,
        Method::POST,
        "/pdf/correlated-plates",
        Some("alice-token"),
        Body::from(r#"{"plates":["ABC1D23"]}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report_id = json_body(response).await["report_id"]
        .as_str()
        .unwrap()
        .to_string();

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].report_id.as_deref(), Some(report_id.as_str()));
    assert_eq!(records[0].body, Some(json!({ "plates": ["ABC1D23"] })));

    let reports = h.audit.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].report_id, report_id);
    assert_eq!(reports[0].kind, "correlated_plates");
    assert_eq!(reports[0].path, "/pdf/correlated-plates");
    assert_eq!(reports[0].caller_id, "alice");
}

#[tokio::test]
async fn failed_report_leaves_no_report_history() {
    let h = harness();
    let router = single_route(
        h.guard.clone(),
        RouteSpec::post("/pdf/correlated-plates").report("correlated_plates"),
        not_found,
    );

    let response = send(&router, Method::POST, "/pdf/correlated-plates", Some("alice-token")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.audit.records().len(), 1);
    assert!(h.audit.reports().is_empty());
}

#[tokio::test]
async fn role_and_cpf_requirements_short_circuit() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut table = RouteTable::new(h.guard.clone());
    table
        .register(
            RouteSpec::post("/cars/monitored").require(Role::Admin),
            counting(calls.clone()),
        )
        .unwrap()
        .register(
            RouteSpec::get("/cortex/plate/{plate}").require_cpf(),
            counting(calls.clone()),
        )
        .unwrap();
    let router = table.finalize().unwrap().router;

    let forbidden = send(&router, Method::POST, "/cars/monitored", Some("alice-token")).await;
    assert_eq!(forbidden.status(), StatusCode::UNAUTHORIZED);

    let admin = send(&router, Method::POST, "/cars/monitored", Some("admin-token")).await;
    assert_eq!(admin.status(), StatusCode::OK);

    let no_cpf = send(&router, Method::GET, "/cortex/plate/ABC1D23", Some("carol-token")).await;
    assert_eq!(no_cpf.status(), StatusCode::UNAUTHORIZED);

    let with_cpf = send(&router, Method::GET, "/cortex/plate/ABC1D23", Some("alice-token")).await;
    assert_eq!(with_cpf.status(), StatusCode::OK);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.audit.records().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_never_exceed_the_ceiling() {
    const N: usize = 20;
    const K: u64 = 5;

    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let router = single_route(
        h.guard.clone(),
        RouteSpec::get("/cars/path").rate_limit(RateLimitRule::per_minute(K)),
        counting(calls.clone()),
    );

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..N {
        let router = router.clone();
        tasks.spawn(async move {
            send(&router, Method::GET, "/cars/path", Some("alice-token"))
                .await
                .status()
        });
    }

    let mut allowed = 0;
    let mut limited = 0;
    while let Some(status) = tasks.join_next().await {
        match status.unwrap() {
            StatusCode::OK => allowed += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(allowed, K as usize);
    assert_eq!(limited, N - K as usize);
    assert_eq!(calls.load(Ordering::SeqCst), K as usize);

    let records = h.audit.records();
    assert_eq!(records.len(), N);
    let rate_limited = records
        .iter()
        .filter(|r| r.outcome == Outcome::RateLimited)
        .count();
    assert_eq!(rate_limited, N - K as usize);
}

async fn echo_plate(_: (), _caller: CallerIdentity, request: RawRequest) -> AppResult<String> {
    let plate: String = request.path().await?;
    Ok(plate)
}

#[tokio::test]
async fn methods_on_one_path_share_a_router_entry() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut table = RouteTable::new(h.guard.clone());
    table
        .register(RouteSpec::get("/cars/monitored/{plate}"), echo_plate)
        .unwrap()
        .register(
            RouteSpec::delete("/cars/monitored/{plate}"),
            counting(calls.clone()),
        )
        .unwrap();
    let routes = table.finalize().unwrap();
    assert_eq!(routes.manifest.len(), 2);

    let get = send(&routes.router, Method::GET, "/cars/monitored/ABC1D23", Some("alice-token")).await;
    assert_eq!(get.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(get.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ABC1D23");

    let delete = send(&routes.router, Method::DELETE, "/cars/monitored/ABC1D23", Some("alice-token")).await;
    assert_eq!(delete.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let put = send(&routes.router, Method::PUT, "/cars/monitored/ABC1D23", Some("alice-token")).await;
    assert_eq!(put.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn audit_record_captures_query_and_body() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let router = single_route(h.guard.clone(), RouteSpec::post("/cars/monitored"), counting(calls));

    send_body(
        &router,
        Method::POST,
        "/cars/monitored?source=panel",
        Some("alice-token"),
        Body::from(r#"{"plate":"ABC1D23"}"#),
    )
    .await;

    let records = h.audit.records();
    assert_eq!(records[0].query_params, json!({ "source": "panel" }));
    assert_eq!(records[0].body, Some(json!({ "plate": "ABC1D23" })));
}

async fn explode(_: (), _caller: CallerIdentity, _request: RawRequest) -> AppResult<String> {
    panic!("handler bug");
}

#[tokio::test]
async fn panicking_handler_is_still_audited() {
    let h = harness();
    let router = single_route(h.guard.clone(), RouteSpec::get("/boom"), explode);

    let response = send(&router, Method::GET, "/boom", Some("alice-token")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Failure);
    assert_eq!(records[0].status_code, 500);
}

struct BrokenLimiter;

#[async_trait]
impl RateLimiter for BrokenLimiter {
    async fn check_and_charge(
        &self,
        _caller: &str,
        _route: &str,
        _rule: RateLimitRule,
    ) -> Result<RateDecision, RateLimitError> {
        Err(RateLimitError::Connection("connection refused".to_string()))
    }

    async fn remaining(
        &self,
        _caller: &str,
        _route: &str,
        _rule: RateLimitRule,
    ) -> Result<Allowance, RateLimitError> {
        Err(RateLimitError::Connection("connection refused".to_string()))
    }
}

#[tokio::test]
async fn limiter_outage_follows_the_failure_policy() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut open = h.guard.clone();
    open.limiter = Arc::new(BrokenLimiter);
    let router = single_route(open.clone(), RouteSpec::get("/cars/path"), counting(calls.clone()));
    let response = send(&router, Method::GET, "/cars/path", Some("alice-token")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let router = single_route(open.fail_closed(), RouteSpec::get("/cars/path"), counting(calls.clone()));
    let response = send(&router, Method::GET, "/cars/path", Some("alice-token")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let records = h.audit.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].outcome, Outcome::Failure);
    assert_eq!(records[1].status_code, 503);
}

#[tokio::test]
async fn queued_sink_still_records_every_call() {
    let h = harness();
    let queue = Arc::new(crate::audit::QueuedAuditSink::spawn(h.audit.clone(), 64));
    let mut guard = h.guard.clone();
    guard.audit = queue.clone();

    let calls = Arc::new(AtomicUsize::new(0));
    let router = single_route(guard, RouteSpec::get("/cars/path"), counting(calls));
    for _ in 0..3 {
        send(&router, Method::GET, "/cars/path", Some("alice-token")).await;
    }

    queue.shutdown().await;
    assert_eq!(h.audit.records().len(), 3);
    assert_eq!(queue.dropped(), 0);
}

#[test]
fn registration_rejects_bad_routes() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut table = RouteTable::<()>::new(h.guard.clone());

    table
        .register(RouteSpec::get("/users/{user_id}"), counting(calls.clone()))
        .unwrap();

    assert!(matches!(
        table.register(RouteSpec::get("/users/{user_id}"), counting(calls.clone())),
        Err(ConfigurationError::Duplicate(_))
    ));
    assert!(matches!(
        table.register(RouteSpec::delete("/users/{id}"), counting(calls.clone())),
        Err(ConfigurationError::Conflict { .. })
    ));
    assert!(matches!(
        table.register(RouteSpec::get("/users/:id/history"), counting(calls.clone())),
        Err(ConfigurationError::InvalidPath { .. })
    ));
    assert!(matches!(
        table.register(
            RouteSpec::get("/cars/path").rate_limit(RateLimitRule::per_minute(0)),
            counting(calls.clone())
        ),
        Err(ConfigurationError::InvalidRateLimit(_))
    ));

    // Rejected registrations leave the table usable.
    table
        .register(RouteSpec::get("/users/{user_id}/history"), counting(calls))
        .unwrap();
    assert_eq!(table.finalize().unwrap().manifest.len(), 2);
}

#[test]
fn unusable_default_ceiling_is_rejected_at_registration() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut guard = h.guard.clone();
    guard.default_limit = RateLimitRule::per_minute(0);
    let mut table = RouteTable::<()>::new(guard);

    assert_eq!(
        table
            .register(RouteSpec::get("/cars/path"), counting(calls.clone()))
            .err(),
        Some(ConfigurationError::InvalidRateLimit("GET /cars/path".to_string()))
    );

    // A route with its own usable ceiling does not depend on the default.
    table
        .register(
            RouteSpec::get("/cars/monitored").rate_limit(RateLimitRule::per_minute(5)),
            counting(calls),
        )
        .unwrap();
}

#[test]
fn empty_table_cannot_be_finalized() {
    let h = harness();
    let table = RouteTable::<()>::new(h.guard);
    assert!(matches!(table.finalize(), Err(ConfigurationError::Empty)));
}

async fn slow(_: (), caller: CallerIdentity, _request: RawRequest) -> AppResult<String> {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok(caller.id)
}

#[tokio::test]
async fn dropped_client_is_still_audited() {
    let h = harness();
    let router = single_route(h.guard.clone(), RouteSpec::get("/cars/path"), slow);

    let request = Request::builder()
        .uri("/cars/path")
        .header(header::AUTHORIZATION, "Bearer alice-token")
        .body(Body::empty())
        .unwrap();

    // The client goes away while the handler is still running.
    let abandoned =
        tokio::time::timeout(std::time::Duration::from_millis(10), router.oneshot(request)).await;
    assert!(abandoned.is_err());
    assert!(h.audit.records().is_empty());

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].caller_id, "alice");
    assert_eq!(records[0].outcome, Outcome::Success);
    assert_eq!(records[0].status_code, 200);
}

#[tokio::test]
async fn oversized_and_interrupted_bodies_are_told_apart() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let router = single_route(
        h.guard.clone(),
        RouteSpec::post("/pdf/correlated-plates"),
        counting(calls.clone()),
    );

    let oversized = Body::from(vec![b' '; 2 * 1024 * 1024 + 1]);
    let response = send_body(
        &router,
        Method::POST,
        "/pdf/correlated-plates",
        Some("alice-token"),
        oversized,
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
        Ok("{\"params\":"),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
    ];
    let interrupted = Body::from_stream(futures::stream::iter(chunks));
    let response = send_body(
        &router,
        Method::POST,
        "/pdf/correlated-plates",
        Some("alice-token"),
        interrupted,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.audit.records().is_empty());
}
