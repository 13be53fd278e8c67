pub mod cache;
pub mod cortex;
pub mod documents;
pub mod jwks;
pub mod oidc;
pub mod path;
pub mod plates;
pub mod rate_limiter;
pub mod redis_conn;
pub mod renderer;
pub mod report_id;
pub mod warehouse;

pub use cache::RedisCache;
pub use cortex::{CortexClient, RegistryLookup};
pub use jwks::JwksVerifier;
pub use oidc::OidcClient;
pub use rate_limiter::{MemoryRateLimiter, RedisRateLimiter};
pub use redis_conn::RedisConnector;
pub use renderer::{HttpRenderer, ReportRenderer};
pub use warehouse::{DetectionWarehouse, HttpWarehouse};
