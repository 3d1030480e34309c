//! 通知分组
//!
//! 同一 `group_id` 的通知折叠为一条滚动摘要：保留最近 `window` 条成员，
//! `count` 记录累计加入的成员数（不受窗口限制）。摘要展示最近 `preview` 条消息，
//! 超出部分以 “+N autres” 结尾。长时间未更新的分组由定时任务清理。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_shared::config::DeviceConfig;
use courier_shared::scheduler::ScheduledTask;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group_id: String,
    pub title: String,
    /// 保留窗口，最旧的在前
    pub members: VecDeque<GroupMember>,
    pub count: u64,
    pub last_updated: DateTime<Utc>,
}

impl GroupSummary {
    /// 生成展示文本：最近 `preview` 条消息（最新在前），其余折叠为后缀
    pub fn render_body(&self, preview: usize) -> String {
        let mut lines: Vec<String> = self
            .members
            .iter()
            .rev()
            .take(preview)
            .map(|m| m.message.clone())
            .collect();

        let shown = lines.len() as u64;
        if self.count > shown {
            lines.push(format!("+{} autres", self.count - shown));
        }
        lines.join("\n")
    }
}

/// 摘要展示接口，由平台通知栏实现
///
/// 在分组锁内调用，同一分组的展示顺序与状态变更顺序一致；实现不得回调 `GroupManager`。
#[cfg_attr(test, mockall::automock)]
pub trait SummaryPresenter: Send + Sync {
    fn present(&self, group_id: &str, title: &str, body: &str) -> Result<()>;

    fn dismiss(&self, group_id: &str) -> Result<()>;
}

/// 仅记录日志的展示实现
#[derive(Default)]
pub struct LoggingPresenter;

impl SummaryPresenter for LoggingPresenter {
    fn present(&self, group_id: &str, title: &str, body: &str) -> Result<()> {
        info!(group_id, title, body, "分组摘要已更新");
        Ok(())
    }

    fn dismiss(&self, group_id: &str) -> Result<()> {
        info!(group_id, "分组摘要已移除");
        Ok(())
    }
}

pub struct GroupManager {
    groups: Mutex<HashMap<String, GroupSummary>>,
    window: usize,
    preview: usize,
    ttl: chrono::Duration,
    presenter: Arc<dyn SummaryPresenter>,
}

enum Render {
    Present(String, String, String),
    Dismiss(String),
}

impl GroupManager {
    pub fn new(config: &DeviceConfig, presenter: Arc<dyn SummaryPresenter>) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            window: config.group_window.max(1),
            preview: config.group_preview,
            ttl: config.group_ttl(),
            presenter,
        }
    }

    /// 加入分组，返回更新后的摘要
    pub fn add_to_group(
        &self,
        group_id: &str,
        member_id: &str,
        message: &str,
        group_title: &str,
    ) -> GroupSummary {
        let now = Utc::now();
        let mut groups = self.groups.lock();
        let summary = {
            let summary = groups
                .entry(group_id.to_string())
                .or_insert_with(|| GroupSummary {
                    group_id: group_id.to_string(),
                    title: group_title.to_string(),
                    members: VecDeque::with_capacity(self.window + 1),
                    count: 0,
                    last_updated: now,
                });

            summary.members.push_back(GroupMember {
                id: member_id.to_string(),
                message: message.to_string(),
                timestamp: now,
            });
            while summary.members.len() > self.window {
                summary.members.pop_front();
            }
            summary.count += 1;
            summary.last_updated = now;
            summary.clone()
        };

        debug!(group_id, member_id, count = summary.count, "通知已加入分组");
        self.render(Render::Present(
            summary.group_id.clone(),
            summary.title.clone(),
            summary.render_body(self.preview),
        ));
        drop(groups);
        summary
    }

    /// 移除成员；分组变空时删除，否则重新渲染。成员不在窗口中时不做任何事
    pub fn remove_from_group(&self, group_id: &str, member_id: &str) -> Option<GroupSummary> {
        let mut groups = self.groups.lock();
        let (render, remaining) = {
            let summary = groups.get_mut(group_id)?;
            let index = summary.members.iter().position(|m| m.id == member_id)?;
            summary.members.remove(index);
            summary.count = summary.count.saturating_sub(1).max(summary.members.len() as u64);
            summary.last_updated = Utc::now();

            if summary.members.is_empty() {
                groups.remove(group_id);
                (Render::Dismiss(group_id.to_string()), None)
            } else {
                let snapshot = summary.clone();
                (
                    Render::Present(
                        snapshot.group_id.clone(),
                        snapshot.title.clone(),
                        snapshot.render_body(self.preview),
                    ),
                    Some(snapshot),
                )
            }
        };

        self.render(render);
        drop(groups);
        remaining
    }

    pub fn get(&self, group_id: &str) -> Option<GroupSummary> {
        self.groups.lock().get(group_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 删除 `last_updated` 早于 `now - ttl` 的分组，返回删除数量
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let mut groups = self.groups.lock();
        let expired: Vec<String> = groups
            .values()
            .filter(|g| g.last_updated < cutoff)
            .map(|g| g.group_id.clone())
            .collect();
        for id in &expired {
            groups.remove(id);
            self.render(Render::Dismiss(id.clone()));
        }
        drop(groups);
        if !expired.is_empty() {
            info!(expired = expired.len(), "已清理过期分组");
        }
        expired.len()
    }

    /// 展示失败不影响分组状态
    fn render(&self, render: Render) {
        let result = match &render {
            Render::Present(group_id, title, body) => self.presenter.present(group_id, title, body),
            Render::Dismiss(group_id) => self.presenter.dismiss(group_id),
        };
        if let Err(e) = result {
            warn!(error = %e, "分组摘要展示失败");
        }
    }

    #[cfg(test)]
    fn backdate(&self, group_id: &str, by: chrono::Duration) {
        if let Some(summary) = self.groups.lock().get_mut(group_id) {
            summary.last_updated -= by;
        }
    }
}

/// 分组过期清理任务
pub struct GroupExpiryTask {
    groups: Arc<GroupManager>,
    interval: Duration,
}

impl GroupExpiryTask {
    pub fn new(groups: Arc<GroupManager>, interval: Duration) -> Self {
        Self { groups, interval }
    }
}

#[async_trait]
impl ScheduledTask for GroupExpiryTask {
    fn name(&self) -> &str {
        "group_expiry"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> anyhow::Result<()> {
        self.groups.sweep_expired(Utc::now());
        Ok(())
    }
}
