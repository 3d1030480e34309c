//! 内存通知仓储

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::NotificationRepository;
use crate::error::{NotificationError, Result};
use crate::models::{Notification, NotificationFilter};

/// 内存通知仓储
///
/// 用于未配置数据库时的本地运行和测试，进程退出后数据丢失。
#[derive(Default)]
pub struct InMemoryNotificationRepository {
    records: DashMap<String, Notification>,
    /// 幂等键 -> 记录 id
    keys: DashMap<String, String>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert_record(&self, notification: &Notification) -> Result<()> {
        match self.records.entry(notification.id.clone()) {
            Entry::Occupied(_) => Err(NotificationError::Conflict(format!(
                "通知 id 重复: {}",
                notification.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(&self, notification: &Notification) -> Result<String> {
        let Some(key) = &notification.idempotency_key else {
            self.insert_record(notification)?;
            return Ok(notification.id.clone());
        };

        // 持有键的分片锁直到记录写入，同一键的并发创建只有一个生效
        match self.keys.entry(key.clone()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                self.insert_record(notification)?;
                slot.insert(notification.id.clone());
                Ok(notification.id.clone())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        notification: &Notification,
        expected_version: i64,
    ) -> Result<bool> {
        let Some(mut current) = self.records.get_mut(&notification.id) else {
            return Err(NotificationError::NotFound(notification.id.clone()));
        };
        if current.version != expected_version {
            return Ok(false);
        }
        *current = notification.clone();
        Ok(true)
    }

    async fn query(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        let mut matched: Vec<Notification> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();

        // uuid v7 按时间有序，用作同一时刻创建时的次序
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        if let Some(limit) = filter.limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use courier_shared::events::{NotificationStatus, NotificationType};

    use crate::models::NewNotification;

    fn sample(user: &str, offset_secs: i64) -> Notification {
        NewNotification::new(user, NotificationType::Delivery, "t", "b")
            .into_notification(Utc::now() + Duration::seconds(offset_secs))
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let repo = InMemoryNotificationRepository::new();
        let n = sample("u-1", 0);
        repo.insert(&n).await.unwrap();
        assert!(matches!(
            repo.insert(&n).await,
            Err(NotificationError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_with_repeated_key_returns_existing() {
        let repo = InMemoryNotificationRepository::new();
        let mut first = sample("u-1", 0);
        first.idempotency_key = Some("env-1".to_string());
        let mut replay = sample("u-1", 5);
        replay.idempotency_key = Some("env-1".to_string());

        assert_eq!(repo.insert(&first).await.unwrap(), first.id);
        assert_eq!(repo.insert(&replay).await.unwrap(), first.id);
        assert_eq!(repo.len(), 1);
        assert!(repo.get(&replay.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_version() {
        let repo = InMemoryNotificationRepository::new();
        let n = sample("u-1", 0);
        repo.insert(&n).await.unwrap();

        let mut updated = n.clone();
        updated.status = NotificationStatus::Sent;
        updated.version = 1;

        assert!(repo.compare_and_swap(&updated, 0).await.unwrap());
        // 旧版本写入失败
        assert!(!repo.compare_and_swap(&updated, 0).await.unwrap());
        assert_eq!(repo.get(&n.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_query_orders_by_created_at() {
        let repo = InMemoryNotificationRepository::new();
        let later = sample("u-1", 10);
        let earlier = sample("u-1", -10);
        let other_user = sample("u-2", 0);
        repo.insert(&later).await.unwrap();
        repo.insert(&earlier).await.unwrap();
        repo.insert(&other_user).await.unwrap();

        let filter = NotificationFilter::by_user_status("u-1", NotificationStatus::Pending);
        let result = repo.query(&filter).await.unwrap();
        let ids: Vec<_> = result.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![earlier.id.as_str(), later.id.as_str()]);

        let limited = repo.query(&filter.with_limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, earlier.id);
    }
}
