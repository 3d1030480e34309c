//! 通知仓储层
//!
//! 仓储只负责持久化，不包含状态机逻辑。所有更新都是基于 `version` 的
//! compare-and-swap，由 `NotificationStore` 负责冲突重试。

mod memory;
mod postgres;

pub use memory::InMemoryNotificationRepository;
pub use postgres::PgNotificationRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Notification, NotificationFilter};

/// 通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// 写入新记录，返回存储中的记录 id
    ///
    /// 记录携带的幂等键已存在时不写入，返回已有记录的 id。
    async fn insert(&self, notification: &Notification) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Option<Notification>>;

    /// 仅当存储中的版本等于 `expected_version` 时写入，返回是否写入成功
    ///
    /// 写入的记录应已携带递增后的 `version`。
    async fn compare_and_swap(&self, notification: &Notification, expected_version: i64)
    -> Result<bool>;

    /// 按条件查询，结果按 `created_at` 升序
    async fn query(&self, filter: &NotificationFilter) -> Result<Vec<Notification>>;
}
