pub mod auth;
pub mod rate_limit;

pub use auth::{AuthFailure, AuthResolver, CallerIdentity, OidcAuthResolver, Role};
pub use rate_limit::RateLimiter;
