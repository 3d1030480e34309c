//! 重试策略与执行器
//!
//! 提供带抖动的指数退避，用于投递失败后的重新调度以及基础设施瞬时故障的自动恢复。
//! 业务逻辑错误（如参数无效）不应被重试，由调用方通过 `is_retryable` 闭包控制。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::DispatchConfig;

// ---------------------------------------------------------------------------
// RetryPolicy: 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 第 N 次失败后的等待时间为 `initial_delay * multiplier^(N-1)`，不超过 `max_delay`。
/// 开启抖动时实际等待时间落在 `[delay/2, delay]` 区间，避免大量失败记录同时重试。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次执行）
    pub max_attempts: u32,
    /// 首次失败后的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
    /// 是否启用抖动
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// 默认策略：最多 5 次尝试，初始等待 30 秒，倍数 2.0，上限 30 分钟
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// 不等待、不抖动的策略，用于测试
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// 计算第 N 次失败后的基础等待时间（failures 从 1 开始）
    ///
    /// 使用 f64 运算后再转回 Duration，接受毫秒级精度损失。
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1) as i32;
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 带抖动的等待时间
    pub fn backoff(&self, failures: u32) -> Duration {
        let delay = self.delay_for_attempt(failures);
        if !self.jitter {
            return delay;
        }

        let delay_ms = delay.as_millis() as u64;
        let half = delay_ms / 2;
        let jittered = half + rand::rng().random_range(0..=delay_ms - half);
        Duration::from_millis(jittered)
    }

    /// 已失败 `failures` 次后是否还允许再次尝试
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy: 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 带重试的异步执行器
///
/// 对任意异步操作应用重试策略。仅在操作返回可重试错误时才重试，
/// 不可重试的错误直接向上传播。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failures: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if failures > 0 {
                    info!(operation = operation_name, failures, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(err) => {
                failures += 1;

                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return Err(err);
                }

                if !policy.should_retry(failures) {
                    warn!(
                        operation = operation_name,
                        failures,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "已达最大尝试次数，放弃重试"
                    );
                    return Err(err);
                }

                let delay = policy.backoff(failures);
                warn!(
                    operation = operation_name,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
