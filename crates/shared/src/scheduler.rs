//! 定时任务调度
//!
//! 将周期性工作（到期通知扫描、分组过期清理）抽象为 `ScheduledTask`，
//! 由 `spawn_scheduled` 在独立的 tokio 任务中按固定间隔驱动，
//! 通过 `watch` channel 接收关闭信号。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::observability::metrics;

/// 可周期执行的任务
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// 任务名称，用于日志与指标标签
    fn name(&self) -> &str;

    /// 两次执行之间的间隔
    fn interval(&self) -> Duration;

    /// 执行一轮任务
    ///
    /// 返回的错误只会被记录，不会终止调度循环。
    async fn tick(&self) -> anyhow::Result<()>;
}

/// 启动调度循环
///
/// 首次 tick 立即执行。上一轮 tick 完成后才开始计时，同一任务不会并发执行。
/// 收到关闭信号后等待当前 tick 完成再退出。
pub fn spawn_scheduled(
    task: Arc<dyn ScheduledTask>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(task = task.name(), interval = ?task.interval(), "定时任务已启动");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = task.tick().await {
                error!(task = task.name(), error = %e, "定时任务执行出错");
            }
            metrics::set_worker_last_run(task.name());

            tokio::select! {
                _ = tokio::time::sleep(task.interval()) => {}
                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为关闭
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(task = task.name(), "定时任务已停止");
    })
}
