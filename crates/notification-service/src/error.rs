//! 通知服务错误类型
//!
//! 区分调用方需要立即感知的错误（参数校验、模板缺失）与由重试流程在内部消化的错误
//! （渠道失败、超时），便于上层决定重试或直接返回。

use courier_shared::error::CourierError;
use courier_shared::events::NotificationStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    // === 调用方错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("通知模板未找到: {0}")]
    TemplateNotFound(String),

    #[error("通知不存在: {0}")]
    NotFound(String),

    #[error("状态不允许此操作: id={id}, status={status}, action={action}")]
    InvalidTransition {
        id: String,
        status: NotificationStatus,
        action: &'static str,
    },

    // === 投递错误 ===
    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    TransportFailure { channel: String, reason: String },

    #[error("投递超时: id={id}, timeout_ms={timeout_ms}")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("重试次数已耗尽: id={id}, attempts={attempts}")]
    RetryExhausted { id: String, attempts: u32 },

    #[error("并发冲突，多次重试后仍未写入: {0}")]
    Conflict(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(#[from] CourierError),
}

/// 通知服务 Result 类型别名
pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    /// 是否为可重试错误
    ///
    /// 渠道失败、超时、并发冲突与数据库错误可重试；校验与查找类错误直接返回调用方。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. } | Self::Timeout { .. } | Self::Conflict(_) | Self::Database(_)
        )
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::TransportFailure { .. } => "TRANSPORT_FAILURE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
        }
    }
}
