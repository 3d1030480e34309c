//! 设备端本地存储
//!
//! 保存离线信封队列以及少量键值状态（待同步标记、角标快照、未读集合、已处理集合），
//! 进程重启后可恢复。

mod memory;
mod sqlite;

pub use memory::MemoryLocalStore;
pub use sqlite::SqliteLocalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::envelope::{EnvelopePayload, OfflineEnvelope};
use crate::error::Result;

/// 待同步标记
pub const PENDING_SYNC_KEY: &str = "sync.pending";
/// 角标快照
pub const BADGE_COUNTS_KEY: &str = "badge.counts";
/// 未读通知集合
pub const INBOX_UNREAD_KEY: &str = "inbox.unread";
/// 已读或已删除的通知 id，有界
pub const INBOX_SETTLED_KEY: &str = "inbox.settled";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// 追加信封，由存储分配 id 与单调递增的 position
    async fn append(&self, payload: &EnvelopePayload, created_at: DateTime<Utc>)
    -> Result<OfflineEnvelope>;

    /// 全部待同步信封，按 `created_at`、`position` 升序
    async fn pending(&self) -> Result<Vec<OfflineEnvelope>>;

    /// 删除信封，不存在时忽略
    async fn remove(&self, id: &str) -> Result<()>;

    async fn len(&self) -> Result<u64>;

    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    async fn set_value(&self, key: &str, value: &str) -> Result<()>;
}
