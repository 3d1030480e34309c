//! 设备收件箱
//!
//! 串联设备端各组件：
//! - 收到通知：记入未读集合 → 加入分组 → 角标 +1
//! - 已读 / 删除：移出未读集合 → 角标 -1 → 移出分组 → 提交服务端（离线时进入队列）
//!
//! 未读集合持久化在本地存储中，重复的已读操作不会重复扣减角标。
//! 已读或已删除的 id 记入有界的已处理集合，同一通知被重新投递时不再计入角标。

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_shared::events::{BadgeCategory, NotificationEvent, NotificationType};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::badge::BadgeCounter;
use crate::connectivity::ConnectivityMonitor;
use crate::envelope::{EnvelopePayload, LifecycleAction, OfflineEnvelope, OutgoingNotification};
use crate::error::Result;
use crate::grouping::GroupManager;
use crate::storage::{INBOX_SETTLED_KEY, INBOX_UNREAD_KEY, LocalStore};
use crate::sync::OfflineSynchronizer;

/// 设备收到的通知
#[derive(Debug, Clone, PartialEq)]
pub struct InboundNotification {
    pub id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub group_id: Option<String>,
    pub group_title: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundNotification {
    pub fn new(
        id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            notification_type,
            title: title.into(),
            body: body.into(),
            group_id: None,
            group_title: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>, group_title: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self.group_title = Some(group_title.into());
        self
    }
}

impl From<NotificationEvent> for InboundNotification {
    fn from(event: NotificationEvent) -> Self {
        let mut inbound = Self::new(
            event.notification_id,
            event.notification_type,
            event.title.clone(),
            event.title,
        );
        inbound.received_at = event.sent_at;
        inbound
    }
}

/// 已处理集合的容量，超出后淘汰最早的 id
const SETTLED_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnreadEntry {
    category: BadgeCategory,
    group_id: Option<String>,
}

#[derive(Debug, Default)]
struct InboxState {
    unread: BTreeMap<String, UnreadEntry>,
    settled: VecDeque<String>,
}

impl InboxState {
    fn is_settled(&self, id: &str) -> bool {
        self.settled.iter().any(|s| s == id)
    }

    /// 记入已处理集合，已存在时返回 `false`
    fn remember_settled(&mut self, id: &str) -> bool {
        if self.is_settled(id) {
            return false;
        }
        if self.settled.len() >= SETTLED_CAPACITY {
            self.settled.pop_front();
        }
        self.settled.push_back(id.to_string());
        true
    }
}

pub struct DeviceInbox {
    store: Arc<dyn LocalStore>,
    badge: Arc<BadgeCounter>,
    groups: Arc<GroupManager>,
    sync: Arc<OfflineSynchronizer>,
    connectivity: ConnectivityMonitor,
    state: Mutex<InboxState>,
}

impl DeviceInbox {
    /// 从本地存储恢复未读集合与已处理集合
    pub async fn restore(
        store: Arc<dyn LocalStore>,
        badge: Arc<BadgeCounter>,
        groups: Arc<GroupManager>,
        sync: Arc<OfflineSynchronizer>,
        connectivity: ConnectivityMonitor,
    ) -> Result<Self> {
        let unread = match store.get_value(INBOX_UNREAD_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => BTreeMap::new(),
        };
        let settled = match store.get_value(INBOX_SETTLED_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => VecDeque::new(),
        };

        Ok(Self {
            store,
            badge,
            groups,
            sync,
            connectivity,
            state: Mutex::new(InboxState { unread, settled }),
        })
    }

    /// 收到一条通知，重复收到或已读、已删除的 id 返回 `false`
    #[instrument(skip(self, notification), fields(notification_id = %notification.id))]
    pub async fn receive(&self, notification: InboundNotification) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.unread.contains_key(&notification.id) {
            debug!("重复收到通知，忽略");
            return Ok(false);
        }
        if state.is_settled(&notification.id) {
            debug!("通知已读或已删除，忽略重新投递");
            return Ok(false);
        }

        let category = notification.notification_type.badge_category();
        state.unread.insert(
            notification.id.clone(),
            UnreadEntry {
                category,
                group_id: notification.group_id.clone(),
            },
        );
        self.persist_unread(&state).await?;

        if let Some(group_id) = &notification.group_id {
            let title = notification
                .group_title
                .as_deref()
                .unwrap_or(&notification.title);
            self.groups
                .add_to_group(group_id, &notification.id, &notification.body, title);
        }
        self.badge.increment(category).await?;
        Ok(true)
    }

    /// 标记已读，未读集合中没有该 id 时返回 `false` 且不做任何事
    #[instrument(skip(self))]
    pub async fn mark_read(&self, id: &str) -> Result<bool> {
        if !self.settle(id).await? {
            debug!(notification_id = %id, "通知不在未读集合中");
            return Ok(false);
        }
        self.sync
            .record(
                EnvelopePayload::Action(LifecycleAction::mark_read(id)),
                self.connectivity.is_online(),
            )
            .await?;
        Ok(true)
    }

    /// 删除通知；未读的通知同时扣减角标
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.settle(id).await? {
            // 未收到或已读的通知同样不应再次计入
            let mut state = self.state.lock().await;
            if state.remember_settled(id) {
                self.persist_settled(&state).await?;
            }
        }
        self.sync
            .record(
                EnvelopePayload::Action(LifecycleAction::delete(id)),
                self.connectivity.is_online(),
            )
            .await?;
        Ok(())
    }

    /// 发送设备端创建的通知
    pub async fn send(&self, notification: OutgoingNotification) -> Result<OfflineEnvelope> {
        self.sync
            .record(
                EnvelopePayload::Notification(notification),
                self.connectivity.is_online(),
            )
            .await
    }

    pub async fn unread_count(&self) -> usize {
        self.state.lock().await.unread.len()
    }

    pub async fn is_unread(&self, id: &str) -> bool {
        self.state.lock().await.unread.contains_key(id)
    }

    /// 移出未读集合并记入已处理集合，随后扣减角标、移出分组
    async fn settle(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.unread.remove(id) else {
            return Ok(false);
        };
        state.remember_settled(id);
        self.persist_settled(&state).await?;
        self.persist_unread(&state).await?;

        self.badge.decrement(entry.category).await?;
        if let Some(group_id) = &entry.group_id {
            self.groups.remove_from_group(group_id, id);
        }
        Ok(true)
    }

    async fn persist_unread(&self, state: &InboxState) -> Result<()> {
        let raw = serde_json::to_string(&state.unread)?;
        self.store.set_value(INBOX_UNREAD_KEY, &raw).await
    }

    async fn persist_settled(&self, state: &InboxState) -> Result<()> {
        let raw = serde_json::to_string(&state.settled)?;
        self.store.set_value(INBOX_SETTLED_KEY, &raw).await
    }
}
