//! 实时广播
//!
//! 通知进入 `sent` 状态时向在线订阅者推送事件，订阅者无需轮询。

use courier_shared::events::NotificationEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// 事件发布接口
///
/// 发布是通知状态变更的附带效果，失败不影响状态变更本身。
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: NotificationEvent);
}

/// 基于 tokio broadcast 的发布器
///
/// 慢订阅者落后超过容量时会丢失最旧的事件（收到 `Lagged`）。
pub struct BroadcastPublisher {
    sender: broadcast::Sender<NotificationEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: NotificationEvent) {
        let notification_id = event.notification_id.clone();
        if self.sender.send(event).is_err() {
            debug!(notification_id = %notification_id, "无在线订阅者，事件未投递");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::events::NotificationType;

    fn event(id: &str) -> NotificationEvent {
        NotificationEvent {
            notification_id: id.to_string(),
            user_id: "u-1".to_string(),
            notification_type: NotificationType::Delivery,
            title: "Nouvelle livraison #DEL1".to_string(),
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx1 = publisher.subscribe();
        let mut rx2 = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        publisher.publish(event("n-1"));

        assert_eq!(rx1.recv().await.unwrap().notification_id, "n-1");
        assert_eq!(rx2.recv().await.unwrap().notification_id, "n-1");
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let publisher = BroadcastPublisher::default();
        publisher.publish(event("n-1"));
    }
}
