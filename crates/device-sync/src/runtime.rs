//! 设备端装配
//!
//! 打开本地存储，恢复角标与未读集合，启动离线同步监听与分组过期清理。

use std::sync::Arc;

use courier_shared::config::DeviceConfig;
use courier_shared::scheduler::spawn_scheduled;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::badge::{BadgeCounter, BadgeSurface};
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::grouping::{GroupExpiryTask, GroupManager, SummaryPresenter};
use crate::inbox::DeviceInbox;
use crate::remote::{HttpNotificationRemote, RemoteNotificationApi};
use crate::storage::{LocalStore, SqliteLocalStore};
use crate::sync::OfflineSynchronizer;

/// 平台相关的外部能力
pub struct DevicePlatform {
    pub badge_surface: Arc<dyn BadgeSurface>,
    pub presenter: Arc<dyn SummaryPresenter>,
}

pub struct DeviceRuntime {
    inbox: Arc<DeviceInbox>,
    badge: Arc<BadgeCounter>,
    groups: Arc<GroupManager>,
    sync: Arc<OfflineSynchronizer>,
    connectivity: ConnectivityMonitor,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl DeviceRuntime {
    /// 使用 SQLite 存储与 HTTP 服务端 API 初始化
    pub async fn init(config: &DeviceConfig, platform: DevicePlatform) -> Result<Self> {
        let store = Arc::new(SqliteLocalStore::connect(&config.storage_url).await?);
        let remote = Arc::new(HttpNotificationRemote::new(
            config.remote_base_url.clone(),
            config.drain_timeout(),
        )?);
        Self::with_components(config, store, remote, platform).await
    }

    pub async fn with_components(
        config: &DeviceConfig,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteNotificationApi>,
        platform: DevicePlatform,
    ) -> Result<Self> {
        let badge = Arc::new(BadgeCounter::restore(store.clone(), platform.badge_surface).await?);
        let groups = Arc::new(GroupManager::new(config, platform.presenter));
        let sync = Arc::new(OfflineSynchronizer::new(
            store.clone(),
            remote,
            config.drain_timeout(),
        ));
        let connectivity = ConnectivityMonitor::new(false);

        let inbox = Arc::new(
            DeviceInbox::restore(
                store,
                badge.clone(),
                groups.clone(),
                sync.clone(),
                connectivity.clone(),
            )
            .await?,
        );

        if sync.has_pending_sync().await? {
            info!(queued = sync.queue_len().await?, "存在未同步的离线变更，等待网络恢复");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(
                sync.clone()
                    .run(connectivity.subscribe(), shutdown_rx.clone()),
            ),
            spawn_scheduled(
                Arc::new(GroupExpiryTask::new(
                    groups.clone(),
                    config.group_sweep_interval(),
                )),
                shutdown_rx,
            ),
        ];

        info!("设备端已启动");
        Ok(Self {
            inbox,
            badge,
            groups,
            sync,
            connectivity,
            shutdown_tx,
            handles,
        })
    }

    pub fn inbox(&self) -> Arc<DeviceInbox> {
        self.inbox.clone()
    }

    pub fn badge(&self) -> Arc<BadgeCounter> {
        self.badge.clone()
    }

    pub fn groups(&self) -> Arc<GroupManager> {
        self.groups.clone()
    }

    pub fn synchronizer(&self) -> Arc<OfflineSynchronizer> {
        self.sync.clone()
    }

    /// 平台网络回调调用此方法更新连接状态
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "后台任务异常退出");
            }
        }
        info!("设备端已停止");
    }
}
