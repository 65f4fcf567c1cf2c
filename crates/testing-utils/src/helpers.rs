//! Test helper utilities and common testing patterns

use chrono::{DateTime, Utc};
use shiftfill_core::{AppConfig, BackoffConfig};
use shiftfill_domain::{GapSnapshot, GapStatus};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// Uses tokio time, so it also works with a paused clock.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;

        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        condition().await
    }

    /// Generate test timestamps with offsets
    pub fn timestamp_with_offset(offset_seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_seconds)
    }
}

/// Default configuration with short backoff delays
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    let fast = BackoffConfig {
        max_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 50,
        multiplier: 2.0,
        jitter_factor: 0.0,
    };
    config.outreach.send = fast.clone();
    config.commit.backoff = fast;
    config.observability.metrics_enabled = false;
    config.server.enabled = false;
    config
}

/// Wait until the published snapshot reaches the given status
pub async fn wait_for_status(
    rx: &mut watch::Receiver<GapSnapshot>,
    status: GapStatus,
) -> GapSnapshot {
    let reached = rx
        .wait_for(|snapshot| snapshot.status == status)
        .await
        .map(|snapshot| snapshot.clone());
    match reached {
        Ok(snapshot) => snapshot,
        Err(_) => {
            let last = rx.borrow().status;
            panic!(
                "coordinator stopped in {:?} before reaching {:?}",
                last, status
            )
        }
    }
}
