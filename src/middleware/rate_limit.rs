use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RateLimitRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Exceeded { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Unspent allowance in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub remaining: u64,
    pub reset_in: Duration,
}

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(String),
}

/// Shared fixed-window counter keyed by caller and route.
///
/// `check_and_charge` must increment and compare in one atomic step so that
/// concurrent requests cannot both pass a nearly exhausted window.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_and_charge(
        &self,
        caller: &str,
        route: &str,
        rule: RateLimitRule,
    ) -> Result<RateDecision, RateLimitError>;

    async fn remaining(
        &self,
        caller: &str,
        route: &str,
        rule: RateLimitRule,
    ) -> Result<Allowance, RateLimitError>;
}

pub fn limit_key(caller: &str, route: &str) -> String {
    format!("rate_limit:{}:{}", route, caller)
}
