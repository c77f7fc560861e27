use deadpool_redis::redis::AsyncCommands;
use uuid::Uuid;

use crate::api::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied,
}

/// Throttle collaborator consulted by the workflow engine. The engine never
/// mutates limiter state beyond this single call.
#[async_trait::async_trait]
pub trait RateLimiter {
    async fn check_and_consume(
        &self,
        user_id: &Uuid,
        action: &str,
    ) -> Result<RateLimitDecision, error::SystemError>;
}

/// Counter-per-window limiter on Redis: INCR the `{action}:{user}` key and
/// attach the window TTL on the first hit. Same semantics as the limiter the
/// service replaced, where the counter resets when the window key expires.
#[derive(Clone)]
pub struct RedisRateLimiter {
    pool: deadpool_redis::Pool,
    limit: u32,
    window_secs: u64,
}

impl RedisRateLimiter {
    pub fn new(pool: deadpool_redis::Pool, limit: u32, window_secs: u64) -> Self {
        Self { pool, limit, window_secs }
    }
}

#[async_trait::async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check_and_consume(
        &self,
        user_id: &Uuid,
        action: &str,
    ) -> Result<RateLimitDecision, error::SystemError> {
        let key = format!("ratelimit:{action}:{user_id}");
        let mut conn = self.pool.get().await?;

        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(&key, self.window_secs as i64).await?;
        }

        if count > i64::from(self.limit) {
            log::warn!("rate limit hit for user {user_id} on {action} ({count} in window)");
            return Ok(RateLimitDecision::Denied);
        }

        Ok(RateLimitDecision::Allowed)
    }
}
