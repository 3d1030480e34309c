//! 离线同步集成测试
//!
//! 服务端使用真实的 `NotificationStore`（内存仓储），通过进程内适配器回放信封，
//! 验证回放顺序、崩溃后的幂等重放以及 SQLite 重启恢复。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_shared::config::DeviceConfig;
use courier_shared::events::{NotificationStatus, NotificationType, Priority, Variables};
use courier_shared::test_utils::{test_user_id, wait_until};
use device_sync::runtime::DevicePlatform;
use device_sync::{
    DeviceRuntime, EnvelopePayload, InboundNotification, LifecycleAction, LifecycleKind,
    LocalStore, LoggingBadgeSurface, LoggingPresenter, MemoryLocalStore, OfflineEnvelope,
    OfflineSynchronizer, OutgoingNotification, RemoteNotificationApi, SqliteLocalStore, SyncError,
};
use notification_service::models::{NewNotification, NotificationFilter};
use notification_service::publisher::BroadcastPublisher;
use notification_service::repository::InMemoryNotificationRepository;
use notification_service::{NotificationError, NotificationStore};
use parking_lot::Mutex;

// ==================== 辅助类型 ====================

/// 把信封回放到进程内的通知存储，信封 id 作为服务端幂等键
struct StoreBackedRemote {
    store: Arc<NotificationStore>,
    submitted: Mutex<Vec<String>>,
}

impl StoreBackedRemote {
    fn new(store: Arc<NotificationStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            submitted: Mutex::new(Vec::new()),
        })
    }

    fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }
}

fn conflict(envelope: &OfflineEnvelope, e: NotificationError) -> SyncError {
    SyncError::SyncConflict {
        envelope_id: envelope.id.clone(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl RemoteNotificationApi for StoreBackedRemote {
    async fn submit(&self, envelope: &OfflineEnvelope) -> device_sync::Result<()> {
        self.submitted.lock().push(envelope.id.clone());

        match &envelope.payload {
            EnvelopePayload::Notification(n) => {
                let mut new = NewNotification::new(
                    n.user_id.clone(),
                    n.notification_type,
                    n.title.clone(),
                    n.body.clone(),
                )
                .with_priority(n.priority)
                .with_idempotency_key(envelope.id.clone());
                new.data = n.data.clone();
                self.store.create(new).await.map_err(|e| conflict(envelope, e))?;
                Ok(())
            }
            EnvelopePayload::Action(action) => {
                let result = match action.kind {
                    LifecycleKind::MarkRead => self.store.mark_read(&action.notification_id).await,
                    LifecycleKind::Delete => self.store.delete(&action.notification_id).await,
                };
                result.map(|_| ()).map_err(|e| conflict(envelope, e))
            }
        }
    }
}

/// 按信封设定不同延迟的服务端
struct JitteryRemote {
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl RemoteNotificationApi for JitteryRemote {
    async fn submit(&self, envelope: &OfflineEnvelope) -> device_sync::Result<()> {
        let delay = match envelope.position % 3 {
            1 => 30,
            2 => 1,
            _ => 10,
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.order.lock().push(action_target(envelope));
        Ok(())
    }
}

/// 删除某个信封时模拟进程崩溃：服务端已确认，本地删除失败
struct CrashingStore {
    inner: MemoryLocalStore,
    crash_on: Mutex<Option<String>>,
    crashed: AtomicBool,
}

#[async_trait]
impl LocalStore for CrashingStore {
    async fn append(
        &self,
        payload: &EnvelopePayload,
        created_at: DateTime<Utc>,
    ) -> device_sync::Result<OfflineEnvelope> {
        self.inner.append(payload, created_at).await
    }

    async fn pending(&self) -> device_sync::Result<Vec<OfflineEnvelope>> {
        self.inner.pending().await
    }

    async fn remove(&self, id: &str) -> device_sync::Result<()> {
        let crash = {
            let mut crash_on = self.crash_on.lock();
            let hit = crash_on.as_deref() == Some(id);
            if hit {
                *crash_on = None;
            }
            hit
        };
        if crash {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(SyncError::Storage(sqlx::Error::PoolClosed));
        }
        self.inner.remove(id).await
    }

    async fn len(&self) -> device_sync::Result<u64> {
        self.inner.len().await
    }

    async fn get_value(&self, key: &str) -> device_sync::Result<Option<String>> {
        self.inner.get_value(key).await
    }

    async fn set_value(&self, key: &str, value: &str) -> device_sync::Result<()> {
        self.inner.set_value(key, value).await
    }
}

fn action_target(envelope: &OfflineEnvelope) -> String {
    match &envelope.payload {
        EnvelopePayload::Action(action) => action.notification_id.clone(),
        EnvelopePayload::Notification(n) => n.title.clone(),
    }
}

fn server_store() -> Arc<NotificationStore> {
    Arc::new(NotificationStore::new(
        Arc::new(InMemoryNotificationRepository::new()),
        Arc::new(BroadcastPublisher::default()),
    ))
}

async fn sent_notification(store: &NotificationStore, user: &str) -> String {
    let id = store
        .create(NewNotification::new(user, NotificationType::Delivery, "Livraison", "Colis prêt"))
        .await
        .unwrap();
    store.mark_sent(&id).await.unwrap();
    id
}

fn outgoing(user: &str, title: &str) -> EnvelopePayload {
    EnvelopePayload::Notification(OutgoingNotification {
        user_id: user.to_string(),
        notification_type: NotificationType::Message,
        priority: Priority::Normal,
        title: title.to_string(),
        body: "Je suis en route".to_string(),
        data: Variables::new(),
    })
}

// ==================== 测试用例 ====================

#[tokio::test]
async fn test_drain_preserves_order_under_varying_latency() {
    let store = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(JitteryRemote {
        order: Mutex::new(Vec::new()),
    });
    let sync = OfflineSynchronizer::new(store, remote.clone(), Duration::from_secs(1));

    for id in ["n-1", "n-2", "n-3", "n-4", "n-5"] {
        sync.enqueue(EnvelopePayload::Action(LifecycleAction::mark_read(id)))
            .await
            .unwrap();
    }
    sync.drain().await.unwrap();

    assert_eq!(*remote.order.lock(), vec!["n-1", "n-2", "n-3", "n-4", "n-5"]);
}

#[tokio::test]
async fn test_offline_reads_replay_idempotently() {
    let server = server_store();
    let user = test_user_id();
    let id = sent_notification(&server, &user).await;

    let store = Arc::new(MemoryLocalStore::new());
    let remote = StoreBackedRemote::new(server.clone());
    let sync = OfflineSynchronizer::new(store.clone(), remote.clone(), Duration::from_secs(1));

    // 离线期间在两个界面各点了一次已读
    sync.enqueue(EnvelopePayload::Action(LifecycleAction::mark_read(&id)))
        .await
        .unwrap();
    sync.enqueue(EnvelopePayload::Action(LifecycleAction::mark_read(&id)))
        .await
        .unwrap();

    let report = sync.drain().await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(report.discarded, 0);

    let n = server.get(&id).await.unwrap();
    assert_eq!(n.status, NotificationStatus::Read);
    assert!(n.read);
}

#[tokio::test]
async fn test_unknown_notification_is_discarded() {
    let server = server_store();
    let store = Arc::new(MemoryLocalStore::new());
    let sync = OfflineSynchronizer::new(
        store.clone(),
        StoreBackedRemote::new(server),
        Duration::from_secs(1),
    );

    sync.enqueue(EnvelopePayload::Action(LifecycleAction::mark_read("missing")))
        .await
        .unwrap();
    let report = sync.drain().await.unwrap();

    assert_eq!(report.discarded, 1);
    assert_eq!(store.len().await.unwrap(), 0);
    assert!(!sync.has_pending_sync().await.unwrap());
}

#[tokio::test]
async fn test_crash_after_confirm_does_not_duplicate() {
    let server = server_store();
    let user = test_user_id();
    let local = Arc::new(CrashingStore {
        inner: MemoryLocalStore::new(),
        crash_on: Mutex::new(None),
        crashed: AtomicBool::new(false),
    });
    let remote = StoreBackedRemote::new(server.clone());

    let sync = OfflineSynchronizer::new(local.clone(), remote.clone(), Duration::from_secs(1));
    sync.enqueue(outgoing(&user, "E1")).await.unwrap();
    let e2 = sync.enqueue(outgoing(&user, "E2")).await.unwrap();
    sync.enqueue(outgoing(&user, "E3")).await.unwrap();
    *local.crash_on.lock() = Some(e2.id.clone());

    assert!(sync.drain().await.is_err());
    assert!(local.crashed.load(Ordering::SeqCst));
    drop(sync);

    // 重启后重新回放
    let restarted = OfflineSynchronizer::new(local.clone(), remote.clone(), Duration::from_secs(1));
    let report = restarted.drain().await.unwrap();
    assert_eq!(report.remaining, 0);

    let created = server
        .query(&NotificationFilter {
            user_id: Some(user.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut titles: Vec<_> = created.iter().map(|n| n.title.clone()).collect();
    titles.sort();
    assert_eq!(titles, vec!["E1", "E2", "E3"]);

    // E2 被提交了两次，但只创建了一条记录
    let submitted = remote.submitted();
    assert_eq!(submitted.iter().filter(|id| **id == e2.id).count(), 2);
}

#[tokio::test]
async fn test_sqlite_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("device.db").display());
    let server = server_store();
    let user = test_user_id();
    let id = sent_notification(&server, &user).await;

    {
        let store = Arc::new(SqliteLocalStore::connect(&url).await.unwrap());
        let sync = OfflineSynchronizer::new(
            store.clone(),
            StoreBackedRemote::new(server.clone()),
            Duration::from_secs(1),
        );
        sync.enqueue(EnvelopePayload::Action(LifecycleAction::mark_read(&id)))
            .await
            .unwrap();
        sync.enqueue(outgoing(&user, "hors ligne")).await.unwrap();
        store.close().await;
    }

    let store = Arc::new(SqliteLocalStore::connect(&url).await.unwrap());
    let sync = OfflineSynchronizer::new(
        store.clone(),
        StoreBackedRemote::new(server.clone()),
        Duration::from_secs(1),
    );
    assert!(sync.has_pending_sync().await.unwrap());
    assert_eq!(sync.queue_len().await.unwrap(), 2);

    let report = sync.drain().await.unwrap();
    assert_eq!(report.synced, 2);
    assert!(!sync.has_pending_sync().await.unwrap());
    assert!(server.get(&id).await.unwrap().read);
}

#[tokio::test]
async fn test_device_runtime_syncs_on_reconnect() {
    let server = server_store();
    let user = test_user_id();
    let id = sent_notification(&server, &user).await;

    let store = Arc::new(MemoryLocalStore::new());
    let runtime = DeviceRuntime::with_components(
        &DeviceConfig {
            drain_timeout_ms: 500,
            ..DeviceConfig::default()
        },
        store.clone(),
        StoreBackedRemote::new(server.clone()),
        DevicePlatform {
            badge_surface: Arc::new(LoggingBadgeSurface),
            presenter: Arc::new(LoggingPresenter),
        },
    )
    .await
    .unwrap();

    let inbox = runtime.inbox();
    inbox
        .receive(InboundNotification::new(&id, NotificationType::Delivery, "Livraison", "Colis prêt"))
        .await
        .unwrap();
    assert_eq!(runtime.badge().snapshot().total(), 1);

    // 离线已读：角标立即更新，服务端尚未更新
    inbox.mark_read(&id).await.unwrap();
    assert_eq!(runtime.badge().snapshot().total(), 0);
    assert_eq!(server.get(&id).await.unwrap().status, NotificationStatus::Sent);

    runtime.connectivity().set_online(true);
    let synced = wait_until(Duration::from_secs(2), || {
        let server = server.clone();
        let id = id.clone();
        async move { server.get(&id).await.unwrap().read }
    })
    .await;
    assert!(synced);
    assert_eq!(store.len().await.unwrap(), 0);

    runtime.shutdown().await;
}
