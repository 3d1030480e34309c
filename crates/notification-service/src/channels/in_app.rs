//! 应用内渠道
//!
//! 在线设备通过实时广播接收通知，这里只记录投递，不依赖外部服务。

use async_trait::async_trait;
use tracing::debug;

use super::{DeliveryChannel, DeliveryTransport};
use crate::error::Result;
use crate::models::Notification;

#[derive(Default)]
pub struct InAppTransport;

impl InAppTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeliveryTransport for InAppTransport {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::InApp
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        debug!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            "应用内通知已入箱"
        );
        Ok(())
    }
}
