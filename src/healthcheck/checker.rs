use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

/// Liveness probe for a materialized resource
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Check if the resource is reachable
    async fn check(&self) -> Result<bool>;
}

/// Check liveness up to `attempts` times, sleeping `interval` between
/// attempts. Returns `true` on the first success.
pub async fn check_with_retry<C: HealthChecker + ?Sized>(
    checker: &C,
    attempts: usize,
    interval: Duration,
) -> bool {
    for attempt in 0..attempts {
        match checker.check().await {
            Ok(true) => return true,
            Ok(false) | Err(_) => {
                // Don't sleep after the last attempt
                if attempt + 1 < attempts {
                    sleep(interval).await;
                }
            }
        }
    }
    false
}
