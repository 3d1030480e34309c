//! 到期通知扫描
//!
//! 周期性加载 `pending` 且 `scheduled_for <= now` 的通知并投递，覆盖计划通知、
//! 失败后重新排队的通知，以及首次投递未完成（进程退出、批量队列丢失、写入出错）
//! 的立即通知。每批记录在批内并发投递，同一条记录的并发保护由
//! 投递执行器负责。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use courier_shared::config::SweepConfig;
use courier_shared::observability::metrics;
use courier_shared::scheduler::ScheduledTask;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use super::executor::{DeliveryExecutor, DeliveryOutcome};
use crate::error::Result;
use crate::models::NotificationFilter;
use crate::store::NotificationStore;

pub struct DueNotificationSweeper {
    store: Arc<NotificationStore>,
    executor: Arc<DeliveryExecutor>,
    config: SweepConfig,
}

impl DueNotificationSweeper {
    pub fn new(
        store: Arc<NotificationStore>,
        executor: Arc<DeliveryExecutor>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    /// 执行一轮扫描，返回本轮尝试投递的记录数
    pub async fn run_once(&self) -> Result<usize> {
        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.concurrency.max(1);
        let mut attempted = 0;

        for _ in 0..self.config.max_batches_per_tick.max(1) {
            let due = self
                .store
                .query(&NotificationFilter::due(Utc::now(), batch_size))
                .await?;
            if due.is_empty() {
                break;
            }

            let loaded = due.len();
            metrics::record_sweep_batch(loaded);

            let outcomes: Vec<_> = stream::iter(due)
                .map(|notification| {
                    let executor = self.executor.clone();
                    async move {
                        let result = executor.deliver(&notification.id).await;
                        (notification.id, result)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (id, result) in outcomes {
                match result {
                    Ok(DeliveryOutcome::Skipped) => {}
                    Ok(_) => attempted += 1,
                    Err(e) => error!(notification_id = %id, error = %e, "到期通知投递出错"),
                }
            }

            // 不足一批说明已取完，剩余的（包括本批刚重新排队的）留到下一轮
            if (loaded as i64) < batch_size {
                break;
            }
        }

        if attempted > 0 {
            info!(attempted, "到期通知扫描完成");
        } else {
            debug!("没有到期通知");
        }
        Ok(attempted)
    }
}

#[async_trait]
impl ScheduledTask for DueNotificationSweeper {
    fn name(&self) -> &str {
        "due_notification_sweep"
    }

    fn interval(&self) -> Duration {
        self.config.interval()
    }

    async fn tick(&self) -> anyhow::Result<()> {
        self.run_once().await?;
        Ok(())
    }
}
