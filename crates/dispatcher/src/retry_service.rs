use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use shiftfill_core::{BackoffConfig, DispatchError};

/// 重试耗尽或遇到不可重试错误
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure {
    pub error: DispatchError,
    pub attempts: u32,
}

/// 有界指数退避
///
/// 只有 `DispatchError::is_retryable()` 的错误会被重试，其余立即返回。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl RetryPolicy {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            multiplier: config.multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 `attempt` 次失败（从1开始）之后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential = base * self.multiplier.powi(exponent);

        let capped = exponential.min(self.max_delay.as_secs_f64());

        // 添加随机抖动以避免同一批外呼同时重试
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_delay = (capped + jitter).clamp(base, self.max_delay.as_secs_f64().max(base));

        Duration::from_secs_f64(final_delay)
    }

    /// 执行 `op`，返回结果和实际尝试次数
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} 在第 {} 次尝试后成功", label, attempt);
                    }
                    return Ok((value, attempt));
                }
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} 第 {} 次尝试失败: {}，{:?} 后重试",
                        label, attempt, error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!("{} 重试 {} 次后仍失败: {}", label, attempt, error);
                    } else {
                        warn!("{} 遇到不可重试错误: {}", label, error);
                    }
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
