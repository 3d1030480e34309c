//! 投递执行器
//!
//! 对单条通知执行一次投递尝试：
//! 1. 同一 id 同时只允许一个投递在进行
//! 2. 只投递 pending 且已到期的记录
//! 3. 渠道调用带超时，超时按失败处理
//! 4. 成功标记 sent；失败由存储在一次写入中累加次数，未超过最大次数时按退避时间
//!    重新排入到期集合，否则停留在 failed

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use courier_shared::events::NotificationStatus;
use courier_shared::observability::metrics;
use courier_shared::retry::RetryPolicy;
use dashmap::DashSet;
use tracing::{debug, error, info, instrument, warn};

use crate::channels::TransportRouter;
use crate::error::{NotificationError, Result};
use crate::store::NotificationStore;

/// 单次投递的结果
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Sent,
    /// 投递失败，已重新排入到期集合
    Requeued { retry_at: DateTime<Utc> },
    /// 重试次数耗尽，记录停留在 failed
    Exhausted,
    /// 未尝试投递：正在投递中、未到期或记录已不是 pending
    Skipped,
}

pub struct DeliveryExecutor {
    store: Arc<NotificationStore>,
    router: TransportRouter,
    policy: RetryPolicy,
    timeout: Duration,
    in_flight: DashSet<String>,
}

/// 投递期间占用 in-flight 标记，drop 时释放
struct InFlightGuard<'a> {
    set: &'a DashSet<String>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl DeliveryExecutor {
    pub fn new(
        store: Arc<NotificationStore>,
        router: TransportRouter,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            router,
            policy,
            timeout,
            in_flight: DashSet::new(),
        }
    }

    fn try_claim(&self, id: &str) -> Option<InFlightGuard<'_>> {
        self.in_flight.insert(id.to_string()).then(|| InFlightGuard {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }

    /// 对一条通知执行一次投递尝试
    ///
    /// 渠道错误在内部转为重试，只有存储错误会返回给调用方。
    #[instrument(skip(self))]
    pub async fn deliver(&self, id: &str) -> Result<DeliveryOutcome> {
        let Some(_claim) = self.try_claim(id) else {
            debug!(notification_id = %id, "已有投递进行中，跳过");
            return Ok(DeliveryOutcome::Skipped);
        };

        let notification = self.store.get(id).await?;
        if notification.status != NotificationStatus::Pending {
            return Ok(DeliveryOutcome::Skipped);
        }
        if !notification.is_due(Utc::now()) {
            debug!(notification_id = %id, scheduled_for = ?notification.scheduled_for, "未到投递时间");
            return Ok(DeliveryOutcome::Skipped);
        }

        let attempt = notification.retry_count + 1;
        let (channel, result) = match self.router.route(&notification) {
            Ok(transport) => {
                let channel = transport.channel();
                let start = Instant::now();
                let result = match tokio::time::timeout(self.timeout, transport.send(&notification)).await {
                    Ok(result) => result,
                    Err(_) => Err(NotificationError::Timeout {
                        id: id.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }),
                };
                let status = if result.is_ok() { "success" } else { "failed" };
                metrics::record_delivery_attempt(
                    channel.as_str(),
                    status,
                    start.elapsed().as_secs_f64(),
                );
                (channel.to_string(), result)
            }
            Err(e) => ("none".to_string(), Err(e)),
        };

        match result {
            Ok(()) => match self.store.mark_sent(id).await? {
                Some(_) => {
                    info!(notification_id = %id, channel = %channel, attempt, "通知投递成功");
                    Ok(DeliveryOutcome::Sent)
                }
                None => Ok(DeliveryOutcome::Skipped),
            },
            Err(e) => {
                warn!(notification_id = %id, channel = %channel, attempt, error = %e, "通知投递失败");
                self.handle_failure(id, &e.to_string()).await
            }
        }
    }

    /// 渠道异步退信回调
    ///
    /// 与同步失败走相同的重试约定：已读、已删除或重试耗尽的记录忽略回调。
    #[instrument(skip(self))]
    pub async fn report_delivery_failure(&self, id: &str, reason: &str) -> Result<DeliveryOutcome> {
        self.handle_failure(id, reason).await
    }

    async fn handle_failure(&self, id: &str, reason: &str) -> Result<DeliveryOutcome> {
        let Some(failed) = self.store.mark_failed(id, reason, &self.policy).await? else {
            return Ok(DeliveryOutcome::Skipped);
        };

        if failed.status == NotificationStatus::Failed {
            let exhausted = NotificationError::RetryExhausted {
                id: id.to_string(),
                attempts: failed.retry_count,
            };
            error!(
                notification_id = %id,
                user_id = %failed.user_id,
                error = %exhausted,
                last_error = reason,
                "重试次数耗尽，需人工介入"
            );
            metrics::record_retry_exhausted(failed.notification_type.as_str());
            return Ok(DeliveryOutcome::Exhausted);
        }

        let retry_at = failed.scheduled_for.unwrap_or(failed.updated_at);
        debug!(
            notification_id = %id,
            retry_count = failed.retry_count,
            retry_at = %retry_at,
            "已安排重试"
        );
        Ok(DeliveryOutcome::Requeued { retry_at })
    }
}
