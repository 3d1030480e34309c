//! 离线信封
//!
//! 一个信封包装一条待同步的变更：设备端新建的通知，或对已有通知的生命周期操作。
//! 信封按 `(created_at, position)` 排序回放，`position` 由本地存储单调分配。

use chrono::{DateTime, Utc};
use courier_shared::events::{NotificationType, Priority, Variables};
use serde::{Deserialize, Serialize};

/// 设备端离线期间创建的通知，例如司机发出的聊天消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingNotification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: Priority,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Variables,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    MarkRead,
    Delete,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkRead => "mark_read",
            Self::Delete => "delete",
        }
    }
}

/// 对已有通知的操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleAction {
    pub notification_id: String,
    pub kind: LifecycleKind,
    /// 用户在设备上操作的时间
    pub at: DateTime<Utc>,
}

impl LifecycleAction {
    pub fn mark_read(notification_id: impl Into<String>) -> Self {
        Self {
            notification_id: notification_id.into(),
            kind: LifecycleKind::MarkRead,
            at: Utc::now(),
        }
    }

    pub fn delete(notification_id: impl Into<String>) -> Self {
        Self {
            notification_id: notification_id.into(),
            kind: LifecycleKind::Delete,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EnvelopePayload {
    Notification(OutgoingNotification),
    Action(LifecycleAction),
}

impl EnvelopePayload {
    /// 用于日志与指标
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Notification(_) => "notification",
            Self::Action(action) => action.kind.as_str(),
        }
    }
}

/// 已持久化的离线信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineEnvelope {
    /// 同时作为服务端的幂等键
    pub id: String,
    pub payload: EnvelopePayload,
    pub created_at: DateTime<Utc>,
    pub position: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let payload = EnvelopePayload::Action(LifecycleAction::mark_read("n-1"));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "action");
        assert_eq!(json["value"]["notificationId"], "n-1");
        assert_eq!(json["value"]["kind"], "mark_read");
        assert_eq!(payload.describe(), "mark_read");

        let back: EnvelopePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
