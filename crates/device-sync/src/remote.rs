//! 服务端通知 API
//!
//! 同步器通过该接口回放离线信封。实现必须保证重复提交同一信封不会产生
//! 重复记录：新建通知以信封 id 作为幂等键，已读 / 删除本身幂等。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::envelope::{EnvelopePayload, LifecycleKind, OfflineEnvelope};
use crate::error::{Result, SyncError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteNotificationApi: Send + Sync {
    /// 提交一个信封，返回 `SyncConflict` 表示该信封无法回放，应丢弃
    async fn submit(&self, envelope: &OfflineEnvelope) -> Result<()>;
}

/// 基于 HTTP 的服务端 API
pub struct HttpNotificationRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, envelope: &OfflineEnvelope) -> reqwest::RequestBuilder {
        let request = match &envelope.payload {
            EnvelopePayload::Notification(notification) => self
                .client
                .post(format!("{}/notifications", self.base_url))
                .json(notification),
            EnvelopePayload::Action(action) => match action.kind {
                LifecycleKind::MarkRead => self.client.post(format!(
                    "{}/notifications/{}/read",
                    self.base_url, action.notification_id
                )),
                LifecycleKind::Delete => self.client.delete(format!(
                    "{}/notifications/{}",
                    self.base_url, action.notification_id
                )),
            },
        };
        request.header("Idempotency-Key", &envelope.id)
    }
}

/// 将响应状态映射为同步结果
fn classify(envelope_id: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::CONFLICT
        | StatusCode::GONE
        | StatusCode::UNPROCESSABLE_ENTITY => Err(SyncError::SyncConflict {
            envelope_id: envelope_id.to_string(),
            reason: status.to_string(),
        }),
        _ => Err(SyncError::RemoteUnavailable(status.to_string())),
    }
}

#[async_trait]
impl RemoteNotificationApi for HttpNotificationRemote {
    async fn submit(&self, envelope: &OfflineEnvelope) -> Result<()> {
        let response = self.request(envelope).send().await?;
        let status = response.status();
        debug!(envelope_id = %envelope.id, status = %status, "信封已提交");
        classify(&envelope.id, status)
    }
}
