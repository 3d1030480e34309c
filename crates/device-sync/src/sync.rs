//! 离线队列与同步器
//!
//! - `enqueue` 把变更写入本地队列并置位持久化的待同步标记
//! - `drain` 按 `created_at` 顺序逐条提交，成功一条立即删除一条，
//!   崩溃时未确认的尾部不会丢失，已确认的也不会重复回放
//! - 单条失败只跳过该信封，留待下一次 drain；冲突信封直接丢弃
//! - 队列清空后才清除待同步标记；写入与清除标记由 `flag_lock` 串行化，
//!   标记为 false 时队列一定为空
//!
//! `drain` 不会与自身并发：执行期间到来的请求合并为“本轮结束后再执行一次”。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use courier_shared::observability::metrics;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::envelope::{EnvelopePayload, OfflineEnvelope};
use crate::error::{Result, SyncError};
use crate::remote::RemoteNotificationApi;
use crate::storage::{LocalStore, PENDING_SYNC_KEY};

/// 一次 drain 的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub synced: usize,
    pub skipped: usize,
    pub discarded: usize,
    /// 队列中剩余的信封数
    pub remaining: u64,
    /// 已有 drain 在执行，本次请求被合并
    pub coalesced: bool,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.discarded += other.discarded;
        self.remaining = other.remaining;
    }
}

pub struct OfflineSynchronizer {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteNotificationApi>,
    timeout: Duration,
    draining: AtomicBool,
    rerun: AtomicBool,
    flag_lock: Mutex<()>,
}

/// drain 出错返回时释放执行权
struct DrainingGuard<'a>(&'a AtomicBool);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineSynchronizer {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteNotificationApi>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            timeout,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            flag_lock: Mutex::new(()),
        }
    }

    /// 写入离线队列
    #[instrument(skip(self, payload), fields(kind = payload.describe()))]
    pub async fn enqueue(&self, payload: EnvelopePayload) -> Result<OfflineEnvelope> {
        let envelope = {
            let _flag = self.flag_lock.lock().await;
            let envelope = self.store.append(&payload, Utc::now()).await?;
            self.store.set_value(PENDING_SYNC_KEY, "true").await?;
            envelope
        };
        metrics::set_offline_queue_depth(self.store.len().await?);

        debug!(envelope_id = %envelope.id, position = envelope.position, "变更已写入离线队列");
        Ok(envelope)
    }

    /// 持久化的待同步标记
    pub async fn has_pending_sync(&self) -> Result<bool> {
        Ok(self
            .store
            .get_value(PENDING_SYNC_KEY)
            .await?
            .is_some_and(|v| v == "true"))
    }

    pub async fn queue_len(&self) -> Result<u64> {
        self.store.len().await
    }

    /// 回放离线队列
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<DrainReport> {
        if self.draining.swap(true, Ordering::AcqRel) {
            self.rerun.store(true, Ordering::Release);
            debug!("已有 drain 在执行，合并到下一轮");
            return Ok(DrainReport {
                coalesced: true,
                ..Default::default()
            });
        }

        let mut total = DrainReport::default();
        loop {
            {
                let _guard = DrainingGuard(&self.draining);
                loop {
                    self.rerun.store(false, Ordering::Release);
                    total.merge(self.drain_once().await?);
                    if !self.rerun.load(Ordering::Acquire) {
                        break;
                    }
                }
            }
            // 释放执行权之后到来的请求可能看到旧的 draining 状态，这里再检查一次
            if !self.rerun.load(Ordering::Acquire) || self.draining.swap(true, Ordering::AcqRel) {
                break;
            }
        }

        info!(
            synced = total.synced,
            skipped = total.skipped,
            discarded = total.discarded,
            remaining = total.remaining,
            "离线队列回放完成"
        );
        Ok(total)
    }

    async fn drain_once(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        for envelope in self.store.pending().await? {
            match self.submit(&envelope).await {
                Ok(()) => {
                    self.store.remove(&envelope.id).await?;
                    report.synced += 1;
                    metrics::record_drain_envelope("synced");
                }
                Err(e @ SyncError::SyncConflict { .. }) => {
                    warn!(envelope_id = %envelope.id, kind = envelope.payload.describe(), error = %e, "信封无法回放，已丢弃");
                    self.store.remove(&envelope.id).await?;
                    report.discarded += 1;
                    metrics::record_drain_envelope("discarded");
                }
                Err(e) => {
                    error!(envelope_id = %envelope.id, kind = envelope.payload.describe(), error = %e, "信封同步失败，留待下次重试");
                    report.skipped += 1;
                    metrics::record_drain_envelope("skipped");
                }
            }
        }

        let _flag = self.flag_lock.lock().await;
        report.remaining = self.store.len().await?;
        metrics::set_offline_queue_depth(report.remaining);
        if report.remaining == 0 {
            self.store.set_value(PENDING_SYNC_KEY, "false").await?;
        }
        Ok(report)
    }

    async fn submit(&self, envelope: &OfflineEnvelope) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.remote.submit(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                envelope_id: envelope.id.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// 记录一条变更：先写入队列保证不丢失，在线时立即回放
    pub async fn record(&self, payload: EnvelopePayload, online: bool) -> Result<OfflineEnvelope> {
        let envelope = self.enqueue(payload).await?;
        if online {
            self.drain().await?;
        }
        Ok(envelope)
    }

    /// 监听连接状态，每次从离线变为在线时回放队列
    pub async fn run(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut online = *connectivity.borrow_and_update();
        if online {
            self.drain_logged().await;
        }

        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *connectivity.borrow_and_update();
                    if now_online && !online {
                        self.drain_logged().await;
                    }
                    online = now_online;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("离线同步器已停止");
    }

    async fn drain_logged(&self) {
        if let Err(e) = self.drain().await {
            error!(error = %e, "离线队列回放出错");
        }
    }
}
