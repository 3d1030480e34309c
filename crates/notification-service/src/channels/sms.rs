//! 短信渠道
//!
//! 当前为模拟实现，生产环境需要接入短信服务商。正文超过单条短信长度时截断。

use async_trait::async_trait;
use tracing::info;

use super::{DeliveryChannel, DeliveryTransport};
use crate::error::Result;
use crate::models::Notification;

/// 单条短信最大字符数
const SMS_MAX_CHARS: usize = 160;

#[derive(Default)]
pub struct SmsTransport;

impl SmsTransport {
    pub fn new() -> Self {
        Self
    }

    /// 拼接标题与正文，超长时截断并追加省略号
    pub fn format_message(notification: &Notification) -> String {
        let full = format!("{}: {}", notification.title, notification.body);
        if full.chars().count() <= SMS_MAX_CHARS {
            return full;
        }
        let mut truncated: String = full.chars().take(SMS_MAX_CHARS - 1).collect();
        truncated.push('…');
        truncated
    }
}

#[async_trait]
impl DeliveryTransport for SmsTransport {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = Self::format_message(notification);
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            length = message.chars().count(),
            "短信发送成功"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::events::NotificationType;

    use crate::models::NewNotification;

    #[test]
    fn test_format_message_truncates() {
        let long_body = "x".repeat(300);
        let n = NewNotification::new("u-1", NotificationType::Alert, "Alerte", long_body)
            .into_notification(Utc::now())
            .unwrap();

        let message = SmsTransport::format_message(&n);
        assert_eq!(message.chars().count(), SMS_MAX_CHARS);
        assert!(message.ends_with('…'));
    }

    #[tokio::test]
    async fn test_send_short_message() {
        let n = NewNotification::new("u-1", NotificationType::Alert, "Alerte", "Retard")
            .into_notification(Utc::now())
            .unwrap();
        assert_eq!(SmsTransport::format_message(&n), "Alerte: Retard");
        SmsTransport::new().send(&n).await.unwrap();
    }
}
