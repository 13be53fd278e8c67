use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitRule;
use crate::middleware::rate_limit::{limit_key, Allowance, RateDecision, RateLimitError, RateLimiter};
use crate::services::redis_conn::RedisConnector;

// INCR and the first-hit expiry run as one script, so the window can never be
// left without a TTL and no two callers observe the same count.
const CHARGE_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
";

/// Distributed fixed-window rate limiter backed by Redis
#[derive(Clone)]
pub struct RedisRateLimiter {
    redis: RedisConnector,
}

impl RedisRateLimiter {
    pub fn new(redis: RedisConnector) -> Self {
        Self { redis }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, RateLimitError> {
        self.redis
            .connection()
            .await
            .map_err(|e| RateLimitError::Connection(e.to_string()))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check_and_charge(
        &self,
        caller: &str,
        route: &str,
        rule: RateLimitRule,
    ) -> Result<RateDecision, RateLimitError> {
        let key = limit_key(caller, route);
        let window_ms = rule.window.as_millis() as i64;

        let mut conn = self.connection().await?;

        let (count, ttl_ms): (i64, i64) = Script::new(CHARGE_SCRIPT)
            .key(&key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Redis(e.to_string()))?;

        if count as u64 <= rule.requests {
            Ok(RateDecision::Allowed {
                remaining: rule.requests - count as u64,
            })
        } else {
            Ok(RateDecision::Exceeded {
                retry_after: Duration::from_millis(ttl_ms.max(0) as u64),
            })
        }
    }

    async fn remaining(
        &self,
        caller: &str,
        route: &str,
        rule: RateLimitRule,
    ) -> Result<Allowance, RateLimitError> {
        let key = limit_key(caller, route);

        let mut conn = self.connection().await?;

        let count: Option<i64> = conn
            .get(&key)
            .await
            .map_err(|e| RateLimitError::Redis(e.to_string()))?;

        let ttl_ms: i64 = conn
            .pttl(&key)
            .await
            .map_err(|e| RateLimitError::Redis(e.to_string()))?;

        // -2: key missing, the window has not started yet
        let reset_in = if ttl_ms < 0 {
            rule.window
        } else {
            Duration::from_millis(ttl_ms as u64)
        };

        Ok(Allowance {
            remaining: rule.requests.saturating_sub(count.unwrap_or(0).max(0) as u64),
            reset_in,
        })
    }
}

struct Window {
    count: u64,
    started: Instant,
    length: Duration,
}

impl Window {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length
    }
}

/// Process-local limiter for single-instance deployments and tests.
#[derive(Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

const PRUNE_THRESHOLD: usize = 10_000;

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_and_charge(
        &self,
        caller: &str,
        route: &str,
        rule: RateLimitRule,
    ) -> Result<RateDecision, RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");

        if windows.len() > PRUNE_THRESHOLD {
            // Each counter expires on its own rule's window.
            windows.retain(|_, w| !w.expired(now));
        }

        let window = windows.entry(limit_key(caller, route)).or_insert(Window {
            count: 0,
            started: now,
            length: rule.window,
        });

        if now.duration_since(window.started) >= rule.window {
            window.count = 0;
            window.started = now;
        }
        window.length = rule.window;

        window.count += 1;

        if window.count <= rule.requests {
            Ok(RateDecision::Allowed {
                remaining: rule.requests - window.count,
            })
        } else {
            Ok(RateDecision::Exceeded {
                retry_after: rule.window.saturating_sub(now.duration_since(window.started)),
            })
        }
    }

    async fn remaining(
        &self,
        caller: &str,
        route: &str,
        rule: RateLimitRule,
    ) -> Result<Allowance, RateLimitError> {
        let now = Instant::now();
        let windows = self.windows.lock().expect("rate limiter mutex poisoned");

        let allowance = match windows.get(&limit_key(caller, route)) {
            Some(w) if now.duration_since(w.started) < rule.window => Allowance {
                remaining: rule.requests.saturating_sub(w.count),
                reset_in: rule.window - now.duration_since(w.started),
            },
            _ => Allowance {
                remaining: rule.requests,
                reset_in: rule.window,
            },
        };

        Ok(allowance)
    }
}
