//! 推送网关渠道
//!
//! 通过 HTTP 调用推送网关（FCM / APNs 代理）。未配置网关地址时仅记录日志，
//! 便于本地运行。

use std::time::Duration;

use async_trait::async_trait;
use courier_shared::config::PushConfig;
use serde::Serialize;
use tracing::{debug, info};

use super::{DeliveryChannel, DeliveryTransport};
use crate::error::{NotificationError, Result};
use crate::models::Notification;

/// 推送网关请求体
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload<'a> {
    notification_id: &'a str,
    to: &'a str,
    title: &'a str,
    body: &'a str,
    priority: &'a str,
    data: &'a courier_shared::events::Variables,
}

pub struct HttpPushTransport {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl HttpPushTransport {
    /// 创建推送渠道，`timeout` 作为 HTTP 请求超时
    pub fn new(config: &PushConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::TransportFailure {
                channel: DeliveryChannel::Push.to_string(),
                reason: format!("HTTP 客户端初始化失败: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: (!config.endpoint.is_empty()).then(|| config.endpoint.clone()),
            api_key: config.api_key.clone(),
        })
    }

    fn failure(reason: impl Into<String>) -> NotificationError {
        NotificationError::TransportFailure {
            channel: DeliveryChannel::Push.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DeliveryTransport for HttpPushTransport {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Push
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let Some(endpoint) = &self.endpoint else {
            info!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                title = %notification.title,
                "未配置推送网关，模拟推送成功"
            );
            return Ok(());
        };

        let payload = PushPayload {
            notification_id: &notification.id,
            to: &notification.user_id,
            title: &notification.title,
            body: &notification.body,
            priority: notification.priority.as_str(),
            data: &notification.data,
        };

        let mut request = self.client.post(endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::failure(format!("网关返回 {status}")));
        }

        debug!(notification_id = %notification.id, %status, "推送网关已受理");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::events::NotificationType;

    use crate::models::NewNotification;

    #[tokio::test]
    async fn test_send_without_endpoint_is_simulated() {
        let transport =
            HttpPushTransport::new(&PushConfig::default(), Duration::from_secs(1)).unwrap();
        let n = NewNotification::new("u-1", NotificationType::Delivery, "t", "b")
            .into_notification(Utc::now())
            .unwrap();

        assert_eq!(transport.channel(), DeliveryChannel::Push);
        transport.send(&n).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_failure() {
        let config = PushConfig {
            // 保留端口，连接必然失败
            endpoint: "http://127.0.0.1:9/push".to_string(),
            api_key: Some("secret".to_string()),
        };
        let transport = HttpPushTransport::new(&config, Duration::from_millis(500)).unwrap();
        let n = NewNotification::new("u-1", NotificationType::Delivery, "t", "b")
            .into_notification(Utc::now())
            .unwrap();

        let result = transport.send(&n).await;
        assert!(matches!(
            result,
            Err(NotificationError::TransportFailure { .. })
        ));
    }
}
