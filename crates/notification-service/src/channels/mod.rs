//! 投递渠道
//!
//! 定义渠道 trait 与按优先级选择渠道的路由。重试约定对所有渠道一致，
//! 渠道实现只需返回成功或 `TransportFailure`。
//!
//! ## 支持的渠道
//!
//! - **Push**: 推送网关（HTTP）
//! - **InApp**: 应用内实时通道
//! - **Sms**: 短信

mod in_app;
mod push;
mod sms;

pub use in_app::InAppTransport;
pub use push::HttpPushTransport;
pub use sms::SmsTransport;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_shared::events::Priority;

use crate::error::{NotificationError, Result};
use crate::models::Notification;

/// 渠道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryChannel {
    Push,
    InApp,
    Sms,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::InApp => "in_app",
            Self::Sms => "sms",
        }
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递通道
///
/// `Immediate` 内联投递；`Batched` 在开启批量时先合并再投递。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryLane {
    Immediate,
    Batched,
}

/// 渠道 trait
///
/// 实现应当无状态或内部同步，便于并发调用。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    fn channel(&self) -> DeliveryChannel;

    /// 发送通知，失败返回 `TransportFailure`
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// 渠道路由
///
/// urgent 走短信，high / normal 走推送，low 走应用内通道；
/// 目标渠道未注册时回退到推送。
#[derive(Default, Clone)]
pub struct TransportRouter {
    transports: HashMap<DeliveryChannel, Arc<dyn DeliveryTransport>>,
}

impl TransportRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册渠道，同一渠道重复注册时后者覆盖前者
    pub fn register(mut self, transport: Arc<dyn DeliveryTransport>) -> Self {
        self.transports.insert(transport.channel(), transport);
        self
    }

    /// 所有渠道共用同一个实现，测试中用于注入 mock
    pub fn single(transport: Arc<dyn DeliveryTransport>) -> Self {
        let mut router = Self::new();
        for channel in [DeliveryChannel::Push, DeliveryChannel::InApp, DeliveryChannel::Sms] {
            router.transports.insert(channel, transport.clone());
        }
        router
    }

    pub fn channel_for(priority: Priority) -> DeliveryChannel {
        match priority {
            Priority::Urgent => DeliveryChannel::Sms,
            Priority::High | Priority::Normal => DeliveryChannel::Push,
            Priority::Low => DeliveryChannel::InApp,
        }
    }

    pub fn lane_for(priority: Priority) -> DeliveryLane {
        if priority.is_expedited() {
            DeliveryLane::Immediate
        } else {
            DeliveryLane::Batched
        }
    }

    /// 选择通知对应的渠道实现
    pub fn route(&self, notification: &Notification) -> Result<Arc<dyn DeliveryTransport>> {
        let channel = Self::channel_for(notification.priority);
        self.transports
            .get(&channel)
            .or_else(|| self.transports.get(&DeliveryChannel::Push))
            .cloned()
            .ok_or_else(|| NotificationError::TransportFailure {
                channel: channel.to_string(),
                reason: "未注册可用渠道".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::events::NotificationType;

    use crate::models::NewNotification;

    fn notification(priority: Priority) -> Notification {
        NewNotification::new("u-1", NotificationType::Delivery, "t", "b")
            .with_priority(priority)
            .into_notification(Utc::now())
            .unwrap()
    }

    fn mock(channel: DeliveryChannel) -> Arc<dyn DeliveryTransport> {
        let mut transport = MockDeliveryTransport::new();
        transport.expect_channel().return_const(channel);
        Arc::new(transport)
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(TransportRouter::channel_for(Priority::Urgent), DeliveryChannel::Sms);
        assert_eq!(TransportRouter::channel_for(Priority::High), DeliveryChannel::Push);
        assert_eq!(TransportRouter::channel_for(Priority::Low), DeliveryChannel::InApp);

        assert_eq!(TransportRouter::lane_for(Priority::Urgent), DeliveryLane::Immediate);
        assert_eq!(TransportRouter::lane_for(Priority::High), DeliveryLane::Immediate);
        assert_eq!(TransportRouter::lane_for(Priority::Normal), DeliveryLane::Batched);
        assert_eq!(TransportRouter::lane_for(Priority::Low), DeliveryLane::Batched);
    }

    #[test]
    fn test_route_falls_back_to_push() {
        let router = TransportRouter::new().register(mock(DeliveryChannel::Push));

        let transport = router.route(&notification(Priority::Urgent)).unwrap();
        assert_eq!(transport.channel(), DeliveryChannel::Push);
    }

    #[test]
    fn test_route_prefers_registered_channel() {
        let router = TransportRouter::new()
            .register(mock(DeliveryChannel::Push))
            .register(mock(DeliveryChannel::Sms));

        let transport = router.route(&notification(Priority::Urgent)).unwrap();
        assert_eq!(transport.channel(), DeliveryChannel::Sms);
    }

    #[test]
    fn test_route_without_transports_fails() {
        let router = TransportRouter::new();
        let result = router.route(&notification(Priority::Normal));
        assert!(matches!(
            result,
            Err(NotificationError::TransportFailure { .. })
        ));
    }
}
