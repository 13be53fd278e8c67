use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// A request ceiling over a fixed window, written as `N/period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub requests: u64,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(requests: u64, window: Duration) -> Self {
        Self { requests, window }
    }

    pub fn per_minute(requests: u64) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }

    /// A rule that lets no request through, or never resets, is a misconfiguration.
    pub fn is_usable(&self) -> bool {
        self.requests > 0 && !self.window.is_zero()
    }
}

impl FromStr for RateLimitRule {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (count, period) = text
            .trim()
            .split_once('/')
            .ok_or_else(|| "use 'N/period' (e.g. '1/second')".to_string())?;

        let requests: u64 = count
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a request count", count))?;
        if requests == 0 {
            return Err("the ceiling must allow at least one request".to_string());
        }

        let seconds = match period.trim() {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            "day" => 86400,
            other => {
                return Err(format!(
                    "unsupported period '{}', expected second, minute, hour or day",
                    other
                ))
            }
        };

        Ok(Self::new(requests, Duration::from_secs(seconds)))
    }
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub turso_auth_token: Option<String>,
    pub port: u16,
    pub redis_url: Option<String>,

    pub oidc_base_url: String,
    pub oidc_issuer_url: String,
    pub oidc_jwks_url: String,
    pub oidc_token_url: String,
    pub oidc_client_id: String,
    pub oidc_client_secret: String,
    pub oidc_token_cache_ttl: u64,

    pub group_user: String,
    pub group_admin: String,
    pub group_agent: String,

    pub rate_limit_default: RateLimitRule,
    pub rate_limit_fail_open: bool,

    pub cortex_base_url: String,
    pub cortex_people_base_url: String,
    pub cortex_username: String,
    pub cortex_password: String,
    pub cortex_cpf_rate_limit: RateLimitRule,

    pub warehouse_url: String,
    pub warehouse_token: Option<String>,
    pub report_renderer_url: String,

    pub audit_queue_capacity: usize,
    pub cache_car_path_ttl: u64,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let oidc_issuer_url = trimmed(required("OIDC_ISSUER_URL")?);
        let cortex_base_url = trimmed(required("CORTEX_BASE_URL")?);

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            turso_auth_token: env::var("TURSO_AUTH_TOKEN").ok(),
            port: parsed("PORT", 8080)?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),

            oidc_base_url: trimmed(required("OIDC_BASE_URL")?),
            oidc_jwks_url: env::var("OIDC_JWKS_URL")
                .unwrap_or_else(|_| format!("{}/jwks/", oidc_issuer_url)),
            oidc_issuer_url,
            oidc_token_url: required("OIDC_TOKEN_URL")?,
            oidc_client_id: required("OIDC_CLIENT_ID")?,
            oidc_client_secret: required("OIDC_CLIENT_SECRET")?,
            oidc_token_cache_ttl: parsed("OIDC_TOKEN_CACHE_TTL", 60 * 45)?,

            group_user: env::var("AUTH_PROVIDER_GROUP_USER")
                .unwrap_or_else(|_| "civitas".to_string()),
            group_admin: env::var("AUTH_PROVIDER_GROUP_ADMIN")
                .unwrap_or_else(|_| "civitas-admin".to_string()),
            group_agent: env::var("AUTH_PROVIDER_GROUP_AGENT")
                .unwrap_or_else(|_| "civitas-agent".to_string()),

            rate_limit_default: rule("RATE_LIMIT_DEFAULT", "60/minute")?,
            rate_limit_fail_open: env::var("RATE_LIMIT_FAIL_OPEN")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",

            cortex_people_base_url: env::var("CORTEX_PEOPLE_BASE_URL")
                .map(trimmed)
                .unwrap_or_else(|_| cortex_base_url.clone()),
            cortex_base_url,
            cortex_username: required("CORTEX_USERNAME")?,
            cortex_password: required("CORTEX_PASSWORD")?,
            cortex_cpf_rate_limit: rule("CORTEX_CPF_RATE_LIMIT", "100/day")?,

            warehouse_url: trimmed(required("WAREHOUSE_URL")?),
            warehouse_token: env::var("WAREHOUSE_TOKEN").ok(),
            report_renderer_url: trimmed(required("REPORT_RENDERER_URL")?),

            audit_queue_capacity: parsed("AUDIT_QUEUE_CAPACITY", 0)?,
            cache_car_path_ttl: parsed("CACHE_CAR_PATH_TTL", 60 * 10)?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
impl Config {
    /// Local-only settings for route tests; external services point at closed ports.
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            turso_auth_token: None,
            port: 0,
            redis_url: None,
            oidc_base_url: "http://127.0.0.1:9".to_string(),
            oidc_issuer_url: "http://127.0.0.1:9/application/o/civitas".to_string(),
            oidc_jwks_url: "http://127.0.0.1:9/application/o/civitas/jwks/".to_string(),
            oidc_token_url: "http://127.0.0.1:9/application/o/token/".to_string(),
            oidc_client_id: "civitas".to_string(),
            oidc_client_secret: "secret".to_string(),
            oidc_token_cache_ttl: 60,
            group_user: "civitas".to_string(),
            group_admin: "civitas-admin".to_string(),
            group_agent: "civitas-agent".to_string(),
            rate_limit_default: RateLimitRule::per_minute(1000),
            rate_limit_fail_open: true,
            cortex_base_url: "http://127.0.0.1:9".to_string(),
            cortex_people_base_url: "http://127.0.0.1:9".to_string(),
            cortex_username: "cortex".to_string(),
            cortex_password: "cortex".to_string(),
            cortex_cpf_rate_limit: RateLimitRule::per_minute(2),
            warehouse_url: "http://127.0.0.1:9".to_string(),
            warehouse_token: None,
            report_renderer_url: "http://127.0.0.1:9".to_string(),
            audit_queue_capacity: 0,
            cache_car_path_ttl: 60,
            allowed_origins: Vec::new(),
        }
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn trimmed(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn rule(key: &'static str, default: &str) -> Result<RateLimitRule, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|reason| ConfigError::Invalid { key, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_limit_rules() {
        let rule: RateLimitRule = "5/minute".parse().unwrap();
        assert_eq!(rule, RateLimitRule::new(5, Duration::from_secs(60)));

        let rule: RateLimitRule = " 100/day ".parse().unwrap();
        assert_eq!(rule.requests, 100);
        assert_eq!(rule.window, Duration::from_secs(86400));
    }

    #[test]
    fn rejects_malformed_rate_limit_rules() {
        assert!("five/minute".parse::<RateLimitRule>().is_err());
        assert!("5/fortnight".parse::<RateLimitRule>().is_err());
        assert!("5".parse::<RateLimitRule>().is_err());
        assert!("0/minute".parse::<RateLimitRule>().is_err());
    }

    #[test]
    fn defaults_write_audit_records_inline() {
        for (key, value) in [
            ("DATABASE_URL", "file:civitas-config-test.db"),
            ("OIDC_ISSUER_URL", "http://idp.local/application/o/civitas/"),
            ("OIDC_BASE_URL", "http://idp.local"),
            ("OIDC_TOKEN_URL", "http://idp.local/application/o/token/"),
            ("OIDC_CLIENT_ID", "civitas"),
            ("OIDC_CLIENT_SECRET", "secret"),
            ("CORTEX_BASE_URL", "http://cortex.local"),
            ("CORTEX_USERNAME", "cortex"),
            ("CORTEX_PASSWORD", "cortex"),
            ("WAREHOUSE_URL", "http://warehouse.local"),
            ("REPORT_RENDERER_URL", "http://renderer.local"),
        ] {
            env::set_var(key, value);
        }
        for key in [
            "AUDIT_QUEUE_CAPACITY",
            "RATE_LIMIT_DEFAULT",
            "RATE_LIMIT_FAIL_OPEN",
            "CORTEX_PEOPLE_BASE_URL",
        ] {
            env::remove_var(key);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.audit_queue_capacity, 0);
        assert_eq!(config.rate_limit_default, RateLimitRule::per_minute(60));
        assert!(config.rate_limit_fail_open);
        assert_eq!(config.oidc_issuer_url, "http://idp.local/application/o/civitas");
        assert_eq!(config.cortex_people_base_url, "http://cortex.local");
    }
}
