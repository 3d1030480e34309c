//! 统一错误处理模块
//!
//! 定义服务端与设备端共用的基础设施错误，业务错误由各 crate 自行定义，
//! 并通过 `#[from]` 包装本类型。

use thiserror::Error;

/// 共享错误类型
#[derive(Debug, Error)]
pub enum CourierError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 数据错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("不支持的变量类型: {key} - {kind}")]
    UnsupportedValueKind { key: String, kind: String },

    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 外部依赖错误 ====================
    #[error("外部服务超时: {service}")]
    Timeout { service: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, CourierError>;

impl CourierError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::UnsupportedValueKind { .. } => "UNSUPPORTED_VALUE_KIND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
