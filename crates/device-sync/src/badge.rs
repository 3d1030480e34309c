//! 未读角标
//!
//! 按分类维护未读数，`total` 每次都由分类求和得出，不单独维护。
//! 每次变更先持久化快照，再同步到系统图标；图标设置失败只记录日志。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_shared::events::BadgeCategory;
use courier_shared::observability::metrics;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{BADGE_COUNTS_KEY, LocalStore};

/// 角标快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeCounts {
    categories: BTreeMap<BadgeCategory, u32>,
    total: u32,
}

impl Default for BadgeCounts {
    fn default() -> Self {
        Self::from_categories(BTreeMap::new())
    }
}

impl BadgeCounts {
    fn from_categories(mut categories: BTreeMap<BadgeCategory, u32>) -> Self {
        for category in BadgeCategory::ALL {
            categories.entry(category).or_insert(0);
        }
        let total = categories.values().sum();
        Self { categories, total }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn get(&self, category: BadgeCategory) -> u32 {
        self.categories.get(&category).copied().unwrap_or(0)
    }

    fn with(&self, category: BadgeCategory, f: impl FnOnce(u32) -> u32) -> Self {
        let mut categories = self.categories.clone();
        let value = categories.entry(category).or_insert(0);
        *value = f(*value);
        Self::from_categories(categories)
    }
}

/// 系统角标接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BadgeSurface: Send + Sync {
    async fn set_badge(&self, total: u32) -> Result<()>;
}

/// 仅记录日志的角标实现
#[derive(Default)]
pub struct LoggingBadgeSurface;

#[async_trait]
impl BadgeSurface for LoggingBadgeSurface {
    async fn set_badge(&self, total: u32) -> Result<()> {
        debug!(total, "系统角标已更新");
        Ok(())
    }
}

pub struct BadgeCounter {
    state: Mutex<BadgeCounts>,
    store: Arc<dyn LocalStore>,
    surface: Arc<dyn BadgeSurface>,
    sender: watch::Sender<BadgeCounts>,
}

impl BadgeCounter {
    /// 从本地存储恢复，缺失或损坏的快照从零开始
    pub async fn restore(store: Arc<dyn LocalStore>, surface: Arc<dyn BadgeSurface>) -> Result<Self> {
        let counts = match store.get_value(BADGE_COUNTS_KEY).await? {
            Some(raw) => match serde_json::from_str::<BadgeCounts>(&raw) {
                // 重新求和，不信任持久化的 total
                Ok(saved) => BadgeCounts::from_categories(saved.categories),
                Err(e) => {
                    warn!(error = %e, "角标快照损坏，已重置");
                    BadgeCounts::default()
                }
            },
            None => BadgeCounts::default(),
        };

        let (sender, _) = watch::channel(counts.clone());
        let counter = Self {
            state: Mutex::new(counts.clone()),
            store,
            surface,
            sender,
        };
        counter.reflect(&counts).await;
        Ok(counter)
    }

    pub async fn increment(&self, category: BadgeCategory) -> Result<BadgeCounts> {
        self.update(|counts| counts.with(category, |v| v.saturating_add(1)))
            .await
    }

    /// 已为 0 时不做任何事
    pub async fn decrement(&self, category: BadgeCategory) -> Result<BadgeCounts> {
        self.update(|counts| counts.with(category, |v| v.saturating_sub(1)))
            .await
    }

    /// 清空一个分类，或在未指定分类时全部清空
    pub async fn clear(&self, category: Option<BadgeCategory>) -> Result<BadgeCounts> {
        self.update(|counts| match category {
            Some(category) => counts.with(category, |_| 0),
            None => BadgeCounts::default(),
        })
        .await
    }

    pub fn snapshot(&self) -> BadgeCounts {
        self.sender.borrow().clone()
    }

    /// 订阅者先读到当前值，之后收到每一次变化
    pub fn subscribe(&self) -> watch::Receiver<BadgeCounts> {
        self.sender.subscribe()
    }

    async fn update(&self, f: impl FnOnce(&BadgeCounts) -> BadgeCounts) -> Result<BadgeCounts> {
        let mut state = self.state.lock().await;
        let next = f(&state);
        if next == *state {
            return Ok(next);
        }

        let raw = serde_json::to_string(&next)?;
        self.store.set_value(BADGE_COUNTS_KEY, &raw).await?;
        *state = next.clone();
        self.sender.send_replace(next.clone());
        self.reflect(&next).await;

        debug!(total = next.total(), "角标已更新");
        Ok(next)
    }

    async fn reflect(&self, counts: &BadgeCounts) {
        metrics::set_badge_total(counts.total());
        if let Err(e) = self.surface.set_badge(counts.total()).await {
            warn!(total = counts.total(), error = %e, "系统角标设置失败");
        }
    }
}
