//! 设备端错误定义

use courier_shared::error::CourierError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 变更无法幂等回放（记录不存在、已被服务端拒绝），信封直接丢弃
    #[error("同步冲突: 信封={envelope_id}, 原因={reason}")]
    SyncConflict { envelope_id: String, reason: String },

    #[error("服务端不可用: {0}")]
    RemoteUnavailable(String),

    #[error("同步超时: 信封={envelope_id}, 超时={timeout_ms}ms")]
    Timeout { envelope_id: String, timeout_ms: u64 },

    #[error("本地存储错误: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("外部界面调用失败: {0}")]
    Surface(String),

    #[error(transparent)]
    Shared(#[from] CourierError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SyncConflict { .. } => "SYNC_CONFLICT",
            Self::RemoteUnavailable(_) => "REMOTE_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Surface(_) => "SURFACE_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 下一次 drain 是否值得重试，冲突类错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_) | Self::Timeout { .. } | Self::Http(_) | Self::Storage(_)
        )
    }
}
