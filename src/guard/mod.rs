//! Guarded route registration.
//!
//! Every route registered through a [`RouteTable`] runs the same fixed
//! pipeline: authenticate the caller, charge the caller's rate-limit window,
//! run the handler, then write the audit trail. Authentication failures stop
//! the pipeline before anything is charged or recorded. Everything after that
//! is audited exactly once, and an audit write failure never changes the
//! response the caller sees.

mod handler;
mod pipeline;
mod request;
mod route;
mod stages;

pub use handler::{GuardedHandler, HandlerFuture};
pub use pipeline::{Flow, GuardContext, Pipeline, Stage};
pub use request::RawRequest;
pub use route::{
    ConfigurationError, DeclaredResponse, Guard, GuardedRoutes, RouteManifestEntry, RouteSpec,
    RouteTable,
};
pub use stages::{AuditStage, AuthStage, HandlerStage, RateLimitStage};

#[cfg(test)]
mod tests;
