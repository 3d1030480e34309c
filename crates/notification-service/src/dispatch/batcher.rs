//! 批量通道
//!
//! low / normal 优先级的通知先进入队列，攒满 `batch_size` 条或等待 `flush_interval`
//! 后一次性并发投递。high / urgent 不经过这里。关闭时投递队列中剩余的通知。

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::executor::DeliveryExecutor;

pub struct BatchQueue {
    sender: mpsc::Sender<String>,
}

impl BatchQueue {
    /// 启动批量投递任务
    pub fn spawn(
        executor: Arc<DeliveryExecutor>,
        batch_size: usize,
        flush_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let batch_size = batch_size.max(1);
        let (sender, receiver) = mpsc::channel(batch_size * 16);
        let handle = tokio::spawn(run(executor, receiver, batch_size, flush_interval, shutdown));
        (Self { sender }, handle)
    }

    /// 入队，批量任务已停止时返回 `false`，调用方应改为内联投递
    pub async fn enqueue(&self, id: &str) -> bool {
        self.sender.send(id.to_string()).await.is_ok()
    }
}

async fn run(
    executor: Arc<DeliveryExecutor>,
    mut receiver: mpsc::Receiver<String>,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(batch_size, flush_interval = ?flush_interval, "批量投递通道已启动");

    let mut buffer: Vec<String> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(id) => {
                    buffer.push(id);
                    if buffer.len() >= batch_size {
                        flush(&executor, &mut buffer).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&executor, &mut buffer).await;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    receiver.close();
    while let Ok(id) = receiver.try_recv() {
        buffer.push(id);
    }
    if !buffer.is_empty() {
        flush(&executor, &mut buffer).await;
    }
    info!("批量投递通道已停止");
}

async fn flush(executor: &DeliveryExecutor, buffer: &mut Vec<String>) {
    let ids = std::mem::take(buffer);
    debug!(count = ids.len(), "批量投递");

    let results = join_all(ids.iter().map(|id| executor.deliver(id))).await;
    for (id, result) in ids.iter().zip(results) {
        if let Err(e) = result {
            error!(notification_id = %id, error = %e, "批量投递出错");
        }
    }
}
