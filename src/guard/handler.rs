use std::future::Future;
use std::pin::Pin;

use axum::response::{IntoResponse, Response};

use crate::error::AppResult;
use crate::guard::RawRequest;
use crate::middleware::auth::CallerIdentity;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A route body that can sit behind the guard.
///
/// Implemented for every `async fn(state, CallerIdentity, RawRequest) -> AppResult<impl IntoResponse>`,
/// so a handler that does not take both the caller and the raw request is
/// rejected when the route is registered rather than when it is first called.
///
/// ```compile_fail
/// use civitas_api::error::AppResult;
/// use civitas_api::guard::{RouteSpec, RouteTable};
/// use civitas_api::middleware::auth::CallerIdentity;
///
/// async fn whoami(_: (), caller: CallerIdentity) -> AppResult<String> {
///     Ok(caller.username)
/// }
///
/// fn register(table: &mut RouteTable<()>) {
///     let _ = table.register(RouteSpec::get("/whoami"), whoami);
/// }
/// ```
pub trait GuardedHandler<S>: Send + Sync + 'static {
    fn call(&self, state: S, caller: CallerIdentity, request: RawRequest) -> HandlerFuture;
}

impl<S, F, Fut, R> GuardedHandler<S> for F
where
    S: Send + 'static,
    F: Fn(S, CallerIdentity, RawRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
    R: IntoResponse,
{
    fn call(&self, state: S, caller: CallerIdentity, request: RawRequest) -> HandlerFuture {
        let fut = (self)(state, caller, request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => response.into_response(),
                Err(e) => e.into_response(),
            }
        })
    }
}
