//! 通知实体

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use courier_shared::events::{
    NotificationAction, NotificationStatus, NotificationType, Priority, Variables,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NotificationError, Result};

/// 通知记录
///
/// 由通知存储独占管理。`read = true` 时状态必为 sent 或 read，
/// 且 `read_at` 当且仅当 `read = true` 时有值。立即投递的通知以创建时间作为
/// `scheduled_for`，首次投递未完成时由到期扫描接手。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    pub data: Variables,
    pub status: NotificationStatus,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub tags: BTreeSet<String>,
    pub actions: Vec<NotificationAction>,
    pub group_id: Option<String>,
    pub group_order: Option<i64>,
    /// 客户端提供的幂等键，重复创建时返回已有记录
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 乐观锁版本号，每次写入递增
    pub version: i64,
}

impl Notification {
    /// 是否已到投递时间（未设置计划时间视为立即投递）
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// 是否已进入不再自动处理的状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            NotificationStatus::Read | NotificationStatus::Deleted | NotificationStatus::Failed
        )
    }
}

/// 创建通知的请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    #[serde(default)]
    pub priority: Priority,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Variables,
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    pub group_id: Option<String>,
    pub group_order: Option<i64>,
    pub idempotency_key: Option<String>,
}

impl NewNotification {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_type: Some(notification_type),
            title: title.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// 校验必填字段
    pub fn validate(&self) -> Result<NotificationType> {
        if self.user_id.trim().is_empty() {
            return Err(NotificationError::Validation("userId 不能为空".to_string()));
        }
        let Some(notification_type) = self.notification_type else {
            return Err(NotificationError::Validation("type 不能为空".to_string()));
        };
        if self.title.trim().is_empty() {
            return Err(NotificationError::Validation("title 不能为空".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(NotificationError::Validation("body 不能为空".to_string()));
        }
        if self
            .idempotency_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(NotificationError::Validation("idempotencyKey 不能为空串".to_string()));
        }
        Ok(notification_type)
    }

    /// 校验并生成待投递记录
    pub fn into_notification(self, now: DateTime<Utc>) -> Result<Notification> {
        let notification_type = self.validate()?;
        Ok(Notification {
            id: Uuid::now_v7().to_string(),
            user_id: self.user_id,
            notification_type,
            priority: self.priority,
            title: self.title,
            body: self.body,
            data: self.data,
            status: NotificationStatus::Pending,
            read: false,
            read_at: None,
            scheduled_for: Some(self.scheduled_for.unwrap_or(now)),
            retry_count: 0,
            last_retry_at: None,
            error: None,
            tags: self.tags,
            actions: self.actions,
            group_id: self.group_id,
            group_order: self.group_order,
            idempotency_key: self.idempotency_key,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }
}

/// 通知查询条件
///
/// 结果按 `created_at` 升序返回。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationFilter {
    pub user_id: Option<String>,
    pub status: Option<NotificationStatus>,
    /// 仅返回 `scheduled_for <= due_before` 的记录
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl NotificationFilter {
    /// 指定用户、指定状态
    pub fn by_user_status(user_id: impl Into<String>, status: NotificationStatus) -> Self {
        Self {
            user_id: Some(user_id.into()),
            status: Some(status),
            ..Default::default()
        }
    }

    /// 到期待投递集合：`status = pending AND scheduled_for <= now`
    pub fn due(now: DateTime<Utc>, limit: i64) -> Self {
        Self {
            status: Some(NotificationStatus::Pending),
            due_before: Some(now),
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 内存实现使用的匹配逻辑
    pub fn matches(&self, notification: &Notification) -> bool {
        if self
            .user_id
            .as_deref()
            .is_some_and(|u| u != notification.user_id)
        {
            return false;
        }
        if self.status.is_some_and(|s| s != notification.status) {
            return false;
        }
        if let Some(now) = self.due_before {
            return notification.scheduled_for.is_some_and(|at| at <= now);
        }
        true
    }
}
