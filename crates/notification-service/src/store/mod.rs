//! 通知存储
//!
//! 通知记录的唯一写入口，负责生命周期状态机：
//!
//! ```text
//! pending ──> sent ──> read
//!    │  ▲       │
//!    │  └───────┤ 失败且未耗尽：retry_count + 1，按退避时间重新到期
//!    ▼          ▼ (退信回调)
//!   failed <────┘ 失败且已耗尽（终态）
//!
//! 任意非 deleted 状态 ──> deleted（终态，清除已读标记）
//! ```
//!
//! 失败计数与重新排队在同一次写入中完成，不存在次数未耗尽却停留在 failed 的记录。
//!
//! 同一通知的写操作在进程内通过按 id 加锁串行执行，落库时再以 `version`
//! 做 compare-and-swap，多实例部署下冲突的一方重新读取后重试。

mod keyed_lock;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_shared::events::{NotificationEvent, NotificationStatus};
use courier_shared::retry::RetryPolicy;
use tracing::{debug, info, instrument, warn};

use crate::error::{NotificationError, Result};
use crate::models::{NewNotification, Notification, NotificationFilter};
use crate::publisher::EventPublisher;
use crate::repository::NotificationRepository;
use keyed_lock::KeyedLocks;

/// 乐观锁冲突时的最大重试次数
const DEFAULT_CAS_ATTEMPTS: u32 = 3;

/// 状态变更结果
enum Transition {
    Applied(Notification),
    Unchanged(Notification),
}

pub struct NotificationStore {
    repo: Arc<dyn NotificationRepository>,
    publisher: Arc<dyn EventPublisher>,
    locks: KeyedLocks,
    max_cas_attempts: u32,
}

impl NotificationStore {
    pub fn new(repo: Arc<dyn NotificationRepository>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            repo,
            publisher,
            locks: KeyedLocks::new(),
            max_cas_attempts: DEFAULT_CAS_ATTEMPTS,
        }
    }

    /// 创建通知，返回记录 id
    ///
    /// 缺少 userId、type、title 或 body 时返回 `Validation`。携带的幂等键已被使用时
    /// 不新建记录，返回首次创建的 id。
    #[instrument(skip(self, new), fields(user_id = %new.user_id))]
    pub async fn create(&self, new: NewNotification) -> Result<String> {
        let notification = new.into_notification(Utc::now())?;
        let id = self.repo.insert(&notification).await?;
        if id != notification.id {
            info!(
                notification_id = %id,
                idempotency_key = ?notification.idempotency_key,
                "幂等键重复，返回已有通知"
            );
            return Ok(id);
        }

        debug!(
            notification_id = %notification.id,
            notification_type = %notification.notification_type,
            priority = %notification.priority,
            "通知已创建"
        );
        Ok(notification.id)
    }

    pub async fn get(&self, id: &str) -> Result<Notification> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))
    }

    /// 按条件查询，结果按创建时间升序
    pub async fn query(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        self.repo.query(filter).await
    }

    /// pending → sent，并广播实时事件
    ///
    /// 记录已不是 pending（已删除、已被其他流程处理）时返回 `None`，本次投递结果作废。
    pub async fn mark_sent(&self, id: &str) -> Result<Option<Notification>> {
        let transition = self
            .transition(id, "mark_sent", |n, _| {
                if n.status != NotificationStatus::Pending {
                    return Ok(false);
                }
                n.status = NotificationStatus::Sent;
                Ok(true)
            })
            .await?;

        match transition {
            Transition::Applied(n) => {
                self.publisher.publish(NotificationEvent {
                    notification_id: n.id.clone(),
                    user_id: n.user_id.clone(),
                    notification_type: n.notification_type,
                    title: n.title.clone(),
                    sent_at: n.updated_at,
                });
                Ok(Some(n))
            }
            Transition::Unchanged(n) => {
                debug!(notification_id = %id, status = %n.status, "记录状态已变化，丢弃投递结果");
                Ok(None)
            }
        }
    }

    /// 记录一次投递失败
    ///
    /// 累加 `retry_count` 并记录原因。策略仍允许重试时回到 pending，
    /// `scheduled_for` 设为退避后的时间；否则停留在 failed 终态。
    /// sent 状态下的失败来自渠道的异步退信回调；终态记录返回 `None`。
    pub async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<Option<Notification>> {
        let transition = self
            .transition(id, "mark_failed", |n, now| {
                if n.is_terminal() {
                    return Ok(false);
                }
                n.retry_count += 1;
                n.last_retry_at = Some(now);
                n.error = Some(error.to_string());

                if policy.should_retry(n.retry_count) {
                    let delay = Duration::from_std(policy.backoff(n.retry_count))
                        .unwrap_or_else(|_| Duration::zero());
                    n.status = NotificationStatus::Pending;
                    n.scheduled_for = Some(now + delay);
                } else {
                    n.status = NotificationStatus::Failed;
                }
                Ok(true)
            })
            .await?;

        Ok(match transition {
            Transition::Applied(n) => Some(n),
            Transition::Unchanged(n) => {
                debug!(notification_id = %id, status = %n.status, "记录已是终态，忽略失败结果");
                None
            }
        })
    }

    /// 标记已读
    ///
    /// 已读或已删除的记录重复调用为空操作；尚未送达（pending / failed）的记录返回
    /// `InvalidTransition`。
    pub async fn mark_read(&self, id: &str) -> Result<Notification> {
        let transition = self
            .transition(id, "mark_read", |n, now| match n.status {
                NotificationStatus::Read | NotificationStatus::Deleted => Ok(false),
                NotificationStatus::Sent => {
                    n.status = NotificationStatus::Read;
                    n.read = true;
                    n.read_at = Some(now);
                    Ok(true)
                }
                status @ (NotificationStatus::Pending | NotificationStatus::Failed) => {
                    Err(NotificationError::InvalidTransition {
                        id: n.id.clone(),
                        status,
                        action: "mark_read",
                    })
                }
            })
            .await?;

        Ok(match transition {
            Transition::Applied(n) | Transition::Unchanged(n) => n,
        })
    }

    /// 逻辑删除，已删除时为空操作
    ///
    /// 删除已读记录时一并清除 `read` / `read_at`，保持 `read ⇒ status ∈ {sent, read}`。
    pub async fn delete(&self, id: &str) -> Result<Notification> {
        let transition = self
            .transition(id, "delete", |n, _| {
                if n.status == NotificationStatus::Deleted {
                    return Ok(false);
                }
                n.status = NotificationStatus::Deleted;
                n.read = false;
                n.read_at = None;
                Ok(true)
            })
            .await?;

        if let Transition::Applied(n) = &transition {
            info!(notification_id = %n.id, user_id = %n.user_id, "通知已删除");
        }
        Ok(match transition {
            Transition::Applied(n) | Transition::Unchanged(n) => n,
        })
    }

    /// 在 id 锁内执行读取-修改-CAS 写入
    ///
    /// `apply` 返回 `false` 表示无需变更；CAS 失败时重新读取并重放 `apply`。
    async fn transition<F>(&self, id: &str, action: &'static str, apply: F) -> Result<Transition>
    where
        F: Fn(&mut Notification, DateTime<Utc>) -> Result<bool> + Send,
    {
        let _guard = self.locks.lock(id).await;

        for attempt in 1..=self.max_cas_attempts {
            let current = self.get(id).await?;
            let mut next = current.clone();
            let now = Utc::now();

            if !apply(&mut next, now)? {
                return Ok(Transition::Unchanged(current));
            }
            next.version = current.version + 1;
            next.updated_at = now;

            if self.repo.compare_and_swap(&next, current.version).await? {
                debug!(
                    notification_id = %id,
                    action,
                    from = %current.status,
                    to = %next.status,
                    "状态变更已写入"
                );
                return Ok(Transition::Applied(next));
            }

            warn!(notification_id = %id, action, attempt, "版本冲突，重新读取后重试");
        }

        Err(NotificationError::Conflict(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::events::NotificationType;

    use crate::publisher::{BroadcastPublisher, MockEventPublisher};
    use crate::repository::{InMemoryNotificationRepository, MockNotificationRepository};

    fn store() -> (NotificationStore, Arc<BroadcastPublisher>) {
        let publisher = Arc::new(BroadcastPublisher::new(16));
        let store = NotificationStore::new(
            Arc::new(InMemoryNotificationRepository::new()),
            publisher.clone(),
        );
        (store, publisher)
    }

    fn new_delivery(user: &str) -> NewNotification {
        NewNotification::new(
            user,
            NotificationType::Delivery,
            "Nouvelle livraison #DEL123",
            "123 Rue X",
        )
    }

    #[tokio::test]
    async fn test_create_sets_pending() {
        let (store, _) = store();
        let id = store.create(new_delivery("u-1")).await.unwrap();

        let n = store.get(&id).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Pending);
        assert!(!n.read);
        assert!(n.read_at.is_none());
        assert_eq!(n.created_at, n.updated_at);
    }

    #[tokio::test]
    async fn test_create_validation_error() {
        let (store, _) = store();
        let result = store.create(new_delivery("")).await;
        assert!(matches!(result, Err(NotificationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_mark_sent_publishes_event() {
        let (store, publisher) = store();
        let mut rx = publisher.subscribe();
        let id = store.create(new_delivery("u-1")).await.unwrap();

        let sent = store.mark_sent(&id).await.unwrap().unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.notification_id, id);
        assert_eq!(event.user_id, "u-1");
        assert_eq!(event.title, "Nouvelle livraison #DEL123");
    }

    #[tokio::test]
    async fn test_mark_sent_discarded_after_delete() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let store = NotificationStore::new(
            Arc::new(InMemoryNotificationRepository::new()),
            Arc::new(publisher),
        );
        let id = store.create(new_delivery("u-1")).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(store.mark_sent(&id).await.unwrap().is_none());
        assert_eq!(store.get(&id).await.unwrap().status, NotificationStatus::Deleted);
    }

    #[tokio::test]
    async fn test_mark_failed_reschedules_in_one_write() {
        let (store, _) = store();
        let id = store.create(new_delivery("u-1")).await.unwrap();
        let policy = RetryPolicy::immediate(2);

        let before = Utc::now();
        let retried = store
            .mark_failed(&id, "gateway 503", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.status, NotificationStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.version, 1);
        assert!(retried.last_retry_at.is_some());
        assert!(retried.scheduled_for.unwrap() >= before);
        assert_eq!(retried.error.as_deref(), Some("gateway 503"));

        let exhausted = store
            .mark_failed(&id, "gateway 503", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exhausted.status, NotificationStatus::Failed);
        assert_eq!(exhausted.retry_count, 2);

        // failed 为终态，迟到的失败回调被忽略
        assert!(store.mark_failed(&id, "late", &policy).await.unwrap().is_none());
        assert_eq!(store.get(&id).await.unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_create_with_repeated_idempotency_key() {
        let (store, _) = store();
        let first = store
            .create(new_delivery("u-1").with_idempotency_key("env-1"))
            .await
            .unwrap();
        let replay = store
            .create(new_delivery("u-1").with_idempotency_key("env-1"))
            .await
            .unwrap();
        let other = store
            .create(new_delivery("u-1").with_idempotency_key("env-2"))
            .await
            .unwrap();

        assert_eq!(first, replay);
        assert_ne!(first, other);
        let all = store
            .query(&NotificationFilter::by_user_status("u-1", NotificationStatus::Pending))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let (store, _) = store();
        let id = store.create(new_delivery("u-1")).await.unwrap();
        store.mark_sent(&id).await.unwrap();

        let first = store.mark_read(&id).await.unwrap();
        let second = store.mark_read(&id).await.unwrap();

        assert!(first.read && second.read);
        assert_eq!(first.status, NotificationStatus::Read);
        assert_eq!(first.read_at, second.read_at);
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn test_mark_read_requires_delivery() {
        let (store, _) = store();
        let id = store.create(new_delivery("u-1")).await.unwrap();

        let result = store.mark_read(&id).await;
        assert!(matches!(
            result,
            Err(NotificationError::InvalidTransition {
                status: NotificationStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_delete_is_logical_and_terminal() {
        let (store, _) = store();
        let id = store.create(new_delivery("u-1")).await.unwrap();
        store.mark_sent(&id).await.unwrap();

        let deleted = store.delete(&id).await.unwrap();
        assert_eq!(deleted.status, NotificationStatus::Deleted);

        // 重复删除、删除后已读均为空操作
        assert_eq!(store.delete(&id).await.unwrap().version, deleted.version);
        assert_eq!(store.mark_read(&id).await.unwrap().version, deleted.version);
        assert!(store
            .mark_failed(&id, "late bounce", &RetryPolicy::immediate(3))
            .await
            .unwrap()
            .is_none());

        // 记录仍可查询
        let all = store
            .query(&NotificationFilter::by_user_status("u-1", NotificationStatus::Deleted))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_read_record_clears_read_flag() {
        let (store, _) = store();
        let id = store.create(new_delivery("u-1")).await.unwrap();
        store.mark_sent(&id).await.unwrap();
        store.mark_read(&id).await.unwrap();

        let deleted = store.delete(&id).await.unwrap();
        assert_eq!(deleted.status, NotificationStatus::Deleted);
        assert!(!deleted.read);
        assert!(deleted.read_at.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_mark_read_applies_once() {
        let (store, _) = store();
        let store = Arc::new(store);
        let id = store.create(new_delivery("u-1")).await.unwrap();
        store.mark_sent(&id).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.mark_read(&id).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let n = store.get(&id).await.unwrap();
        // create=0, sent=1, read=2
        assert_eq!(n.version, 2);
        assert_eq!(store.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cas_conflict_retries_then_succeeds() {
        let base = new_delivery("u-1").into_notification(Utc::now()).unwrap();
        let id = base.id.clone();

        let mut repo = MockNotificationRepository::new();
        let record = base.clone();
        repo.expect_get()
            .returning(move |_| Ok(Some(record.clone())));
        let mut calls = 0;
        repo.expect_compare_and_swap()
            .times(2)
            .returning(move |_, expected| {
                assert_eq!(expected, 0);
                calls += 1;
                Ok(calls == 2)
            });

        let store = NotificationStore::new(Arc::new(repo), Arc::new(BroadcastPublisher::new(4)));
        let sent = store.mark_sent(&id).await.unwrap().unwrap();
        assert_eq!(sent.version, 1);
    }

    #[tokio::test]
    async fn test_cas_conflict_exhausted() {
        let base = new_delivery("u-1").into_notification(Utc::now()).unwrap();
        let id = base.id.clone();

        let mut repo = MockNotificationRepository::new();
        repo.expect_get()
            .returning(move |_| Ok(Some(base.clone())));
        repo.expect_compare_and_swap()
            .times(DEFAULT_CAS_ATTEMPTS as usize)
            .returning(|_, _| Ok(false));

        let store = NotificationStore::new(Arc::new(repo), Arc::new(BroadcastPublisher::new(4)));
        let result = store.delete(&id).await;
        assert!(matches!(result, Err(NotificationError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_missing_record() {
        let (store, _) = store();
        assert!(matches!(
            store.mark_read("missing").await,
            Err(NotificationError::NotFound(_))
        ));
    }
}
