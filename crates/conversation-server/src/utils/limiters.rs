use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::utils::error::ApiError;

/// Bounds concurrency and latency of every language-model provider call.
///
/// A call that cannot get a permit within `acquire_timeout`, or that runs
/// longer than `call_timeout`, fails with `ProviderTimeout`. The in-flight
/// future is dropped, so nothing it would have written is ever committed.
#[derive(Clone)]
pub struct ProviderLimiter {
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    call_timeout: Duration,
}

impl ProviderLimiter {
    pub fn new(max_concurrency: usize, acquire_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            acquire_timeout: acquire_timeout.max(Duration::from_millis(1)),
            call_timeout,
        }
    }

    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self::new(
            cfg.max_concurrency,
            Duration::from_millis(cfg.acquire_timeout_ms),
            Duration::from_secs(cfg.timeout_seconds),
        )
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<T, F>(&self, op: &'static str, call: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let start = Instant::now();

        let _permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                warn!("Provider limiter acquire timeout for op={}", op);
                ApiError::ProviderTimeout(format!("no provider capacity for {} within {:?}", op, self.acquire_timeout))
            })?
            .map_err(|e| ApiError::Internal(format!("provider limiter closed: {}", e)))?;

        let waited = start.elapsed();

        let result = tokio::time::timeout(self.call_timeout, call).await.map_err(|_| {
            warn!("Provider call op={} exceeded {:?}", op, self.call_timeout);
            ApiError::ProviderTimeout(format!("{} exceeded {:?}", op, self.call_timeout))
        })?;

        debug!(
            "Provider op={} finished in {:?} (waited {:?} for permit)",
            op,
            start.elapsed(),
            waited
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_timeout_maps_to_provider_timeout() {
        let limiter = ProviderLimiter::new(1, Duration::from_millis(50), Duration::from_millis(20));
        let result: Result<(), ApiError> = limiter
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), "PROVIDER_TIMEOUT");
        // Permit released after the timeout
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_when_saturated() {
        let limiter = ProviderLimiter::new(1, Duration::from_millis(20), Duration::from_secs(5));
        let held = limiter.permits.clone().acquire_owned().await.unwrap();

        let result = limiter.run("blocked", async { Ok(1) }).await;
        assert!(matches!(result, Err(ApiError::ProviderTimeout(_))));

        drop(held);
        assert_eq!(limiter.run("free", async { Ok(2) }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let limiter = ProviderLimiter::new(2, Duration::from_millis(50), Duration::from_secs(1));
        let result: Result<(), ApiError> = limiter
            .run("failing", async { Err(ApiError::ProviderError("500".into())) })
            .await;
        assert_eq!(result.unwrap_err(), ApiError::ProviderError("500".into()));
    }
}
