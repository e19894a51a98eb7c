use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::Client as RedisClient;

/// Gate for the generative stage
///
/// One counter per UTC day against a fixed ceiling. The counter lives in an
/// external atomically-updated store, so no in-process locking is needed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationQuota: Send + Sync {
    /// Best-effort read of today's usage
    async fn usage(&self) -> u32;

    /// Whether the generative stage may run right now
    ///
    /// Must fail in the safe direction: if the counter backend is
    /// unreachable, report the quota as exhausted instead of erroring.
    async fn can_use(&self) -> bool;

    /// Records one generative-model call
    ///
    /// Called exactly once per model invocation, whether or not the model
    /// returned usable ids. Failures are logged and swallowed.
    async fn record_use(&self);
}

/// Redis-backed daily counter
///
/// The key is scoped to the current UTC date and expires at the next UTC
/// midnight, so the counter resets itself without an explicit reset call.
pub struct QuotaGuard {
    redis_client: RedisClient,
    ceiling: u32,
}

impl QuotaGuard {
    pub fn new(redis_client: RedisClient, ceiling: u32) -> Self {
        Self {
            redis_client,
            ceiling,
        }
    }

    fn day_key(now: DateTime<Utc>) -> String {
        format!("ai_usage:{}", now.format("%Y-%m-%d"))
    }

    fn seconds_until_utc_midnight(now: DateTime<Utc>) -> i64 {
        let next_midnight = (now + chrono::Duration::days(1))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc();
        // Keep a floor so a key written at 23:59:59 still outlives the write
        (next_midnight - now).num_seconds().max(60)
    }

    async fn read_usage(&self) -> crate::error::AppResult<u32> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let count: Option<u32> = conn.get(Self::day_key(Utc::now())).await?;
        Ok(count.unwrap_or(0))
    }
}

#[async_trait]
impl GenerationQuota for QuotaGuard {
    async fn usage(&self) -> u32 {
        match self.read_usage().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Quota usage read failed");
                0
            }
        }
    }

    async fn can_use(&self) -> bool {
        match self.read_usage().await {
            Ok(count) => {
                if count as f32 / self.ceiling as f32 > 0.8 {
                    tracing::warn!(
                        current = count,
                        ceiling = self.ceiling,
                        "Daily generative quota above 80%"
                    );
                }
                count < self.ceiling
            }
            Err(e) => {
                // Counter backend down: treat as exhausted, never crash the pipeline
                tracing::warn!(error = %e, "Quota backend unavailable, skipping generative stage");
                false
            }
        }
    }

    async fn record_use(&self) {
        let now = Utc::now();
        let key = Self::day_key(now);
        let result: crate::error::AppResult<()> = async {
            let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
            let _: () = conn.incr(&key, 1).await?;
            let _: () = conn
                .expire(&key, Self::seconds_until_utc_midnight(now))
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, key = %key, "Failed to record generative usage");
        }
    }
}
