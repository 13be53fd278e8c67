use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    routing::{MethodFilter, MethodRouter},
    Router,
};
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditSink;
use crate::config::RateLimitRule;
use crate::guard::handler::GuardedHandler;
use crate::guard::pipeline::Pipeline;
use crate::middleware::auth::{AuthResolver, Role};
use crate::middleware::rate_limit::RateLimiter;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("route {route}: invalid path template ({reason})")]
    InvalidPath { route: String, reason: String },

    #[error("route {0} is registered more than once")]
    Duplicate(String),

    #[error("route {first} conflicts with {second}")]
    Conflict { first: String, second: String },

    #[error("route {0}: unsupported method")]
    UnsupportedMethod(String),

    #[error("route {0}: rate limit needs at least one request over a non-zero window")]
    InvalidRateLimit(String),

    #[error("no guarded routes were registered")]
    Empty,
}

/// Declaration of one guarded route.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) summary: Option<String>,
    pub(crate) responses: Vec<(StatusCode, String)>,
    pub(crate) roles: Vec<Role>,
    pub(crate) requires_cpf: bool,
    pub(crate) rate_limit: Option<RateLimitRule>,
    pub(crate) report_kind: Option<String>,
}

impl RouteSpec {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            summary: None,
            responses: Vec::new(),
            roles: Vec::new(),
            requires_cpf: false,
            rate_limit: None,
            report_kind: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn responds(mut self, status: StatusCode, description: &str) -> Self {
        self.responses.push((status, description.to_string()));
        self
    }

    pub fn require(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn require_cpf(mut self) -> Self {
        self.requires_cpf = true;
        self
    }

    pub fn rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rate_limit = Some(rule);
        self
    }

    /// Marks the route as report-generating; successful calls leave a report-history entry.
    pub fn report(mut self, kind: &str) -> Self {
        self.report_kind = Some(kind.to_string());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn report_kind(&self) -> Option<&str> {
        self.report_kind.as_deref()
    }

    /// Identifies the route for rate limiting and logs, e.g. `GET /cars/path`.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    fn manifest_entry(&self) -> RouteManifestEntry {
        RouteManifestEntry {
            method: self.method.to_string(),
            path: self.path.clone(),
            summary: self.summary.clone(),
            roles: self.roles.clone(),
            requires_cpf: self.requires_cpf,
            report_kind: self.report_kind.clone(),
            responses: self
                .responses
                .iter()
                .map(|(status, description)| DeclaredResponse {
                    status: status.as_u16(),
                    description: description.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclaredResponse {
    pub status: u16,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteManifestEntry {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub roles: Vec<Role>,
    pub requires_cpf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_kind: Option<String>,
    pub responses: Vec<DeclaredResponse>,
}

/// Collaborators shared by every guarded route.
#[derive(Clone)]
pub struct Guard {
    pub auth: Arc<dyn AuthResolver>,
    pub limiter: Arc<dyn RateLimiter>,
    pub audit: Arc<dyn AuditSink>,
    pub default_limit: RateLimitRule,
    pub fail_open: bool,
}

impl Guard {
    pub fn new(
        auth: Arc<dyn AuthResolver>,
        limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditSink>,
        default_limit: RateLimitRule,
    ) -> Self {
        Self {
            auth,
            limiter,
            audit,
            default_limit,
            fail_open: true,
        }
    }

    /// Reject requests with 503 instead of admitting them when the limiter backend is down.
    pub fn fail_closed(mut self) -> Self {
        self.fail_open = false;
        self
    }
}

/// Result of [`RouteTable::finalize`], ready to be merged into the application router.
pub struct GuardedRoutes<S> {
    pub router: Router<S>,
    pub manifest: Vec<RouteManifestEntry>,
}

/// Registry of guarded routes. Built once at startup, then finalized into a router.
pub struct RouteTable<S> {
    guard: Guard,
    routers: BTreeMap<String, MethodRouter<S>>,
    registered: HashSet<String>,
    shapes: HashMap<String, String>,
    manifest: Vec<RouteManifestEntry>,
}

impl<S> RouteTable<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(guard: Guard) -> Self {
        Self {
            guard,
            routers: BTreeMap::new(),
            registered: HashSet::new(),
            shapes: HashMap::new(),
            manifest: Vec::new(),
        }
    }

    pub fn register<H>(&mut self, spec: RouteSpec, handler: H) -> Result<&mut Self, ConfigurationError>
    where
        H: GuardedHandler<S>,
    {
        let key = spec.key();

        let shape = template_shape(&spec.path).map_err(|reason| ConfigurationError::InvalidPath {
            route: key.clone(),
            reason,
        })?;

        let filter = MethodFilter::try_from(spec.method.clone())
            .map_err(|_| ConfigurationError::UnsupportedMethod(key.clone()))?;

        if !spec.rate_limit.unwrap_or(self.guard.default_limit).is_usable() {
            return Err(ConfigurationError::InvalidRateLimit(key));
        }

        if self.registered.contains(&key) {
            return Err(ConfigurationError::Duplicate(key));
        }

        // `/a/{x}` and `/a/{y}` would collide in the router.
        if let Some(existing) = self.shapes.get(&shape) {
            if *existing != spec.path {
                return Err(ConfigurationError::Conflict {
                    first: existing.clone(),
                    second: spec.path.clone(),
                });
            }
        }

        let pipeline = Arc::new(Pipeline::new(&self.guard, spec.clone(), Arc::new(handler)));
        let endpoint = move |State(state): State<S>, request: Request| {
            let pipeline = pipeline.clone();
            async move { pipeline.dispatch(state, request).await }
        };

        let router = match self.routers.remove(&spec.path) {
            Some(router) => router.on(filter, endpoint),
            None => axum::routing::on(filter, endpoint),
        };
        self.routers.insert(spec.path.clone(), router);

        tracing::debug!("Registered guarded route {}", key);

        self.shapes.insert(shape, spec.path.clone());
        self.registered.insert(key);
        self.manifest.push(spec.manifest_entry());

        Ok(self)
    }

    pub fn finalize(self) -> Result<GuardedRoutes<S>, ConfigurationError> {
        if self.routers.is_empty() {
            return Err(ConfigurationError::Empty);
        }

        let mut router = Router::new();
        for (path, method_router) in self.routers {
            router = router.route(&path, method_router);
        }

        tracing::info!("Finalized {} guarded routes", self.manifest.len());

        Ok(GuardedRoutes {
            router,
            manifest: self.manifest,
        })
    }
}

/// Validates a `/segment/{param}` template and returns it with parameter names erased.
fn template_shape(path: &str) -> Result<String, String> {
    if !path.starts_with('/') {
        return Err("must start with '/'".to_string());
    }

    let mut params = HashSet::new();
    let mut shape = Vec::new();

    for segment in path.split('/').skip(1) {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(format!("use '{{name}}' instead of '{}'", segment));
        }

        if let Some(inner) = segment.strip_prefix('{') {
            let name = inner
                .strip_suffix('}')
                .ok_or_else(|| format!("unclosed parameter in '{}'", segment))?;

            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("bad parameter name '{}'", name));
            }
            if !params.insert(name.to_string()) {
                return Err(format!("parameter '{}' appears twice", name));
            }
            shape.push("{}");
        } else if segment.contains('{') || segment.contains('}') {
            return Err(format!("parameters must span a whole segment: '{}'", segment));
        } else {
            if segment.is_empty() && path != "/" {
                return Err("empty segment".to_string());
            }
            shape.push(segment);
        }
    }

    Ok(format!("/{}", shape.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_templates() {
        assert_eq!(template_shape("/cars/path").unwrap(), "/cars/path");
        assert_eq!(
            template_shape("/users/{user_id}/history").unwrap(),
            "/users/{}/history"
        );
        assert_eq!(template_shape("/").unwrap(), "/");
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(template_shape("cars").is_err());
        assert!(template_shape("/cars/:plate").is_err());
        assert!(template_shape("/cars/{plate").is_err());
        assert!(template_shape("/cars/plate-{id}").is_err());
        assert!(template_shape("/a/{id}/b/{id}").is_err());
        assert!(template_shape("/cars//path").is_err());
        assert!(template_shape("/cars/{}").is_err());
    }

    #[test]
    fn route_key_combines_method_and_template() {
        let spec = RouteSpec::delete("/cars/monitored/{plate}");
        assert_eq!(spec.key(), "DELETE /cars/monitored/{plate}");
    }

    #[test]
    fn roles_are_not_duplicated() {
        let spec = RouteSpec::get("/x").require(Role::Admin).require(Role::Admin);
        assert_eq!(spec.roles, vec![Role::Admin]);
    }
}
