use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::services::redis_conn::RedisConnector;

/// Best-effort JSON cache. Misses and backend errors look the same to callers.
#[derive(Clone)]
pub struct RedisCache {
    redis: RedisConnector,
}

impl RedisCache {
    pub fn new(redis: RedisConnector) -> Self {
        Self { redis }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = match self.redis.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Cache unavailable: {}", e);
                return None;
            }
        };

        let raw: Option<String> = match conn.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                self.redis.reset().await;
                return None;
            }
        };

        raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        })
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to encode cache entry {}: {}", key, e);
                return;
            }
        };

        let mut conn = match self.redis.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Cache unavailable: {}", e);
                return;
            }
        };

        let result: Result<(), redis::RedisError> = conn.set_ex(key, raw, ttl_secs).await;
        if let Err(e) = result {
            tracing::warn!("Cache write failed for {}: {}", key, e);
            self.redis.reset().await;
        }
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        self.redis.ping().await
    }
}
