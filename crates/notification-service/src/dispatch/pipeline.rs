//! 分发入口
//!
//! 业务模块调用 `dispatch` 发出通知，同步返回的是新通知 id 而不是送达确认。
//! 参数校验与模板缺失错误同步返回；投递失败由重试流程处理，不会传出。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_shared::events::{Priority, Variables};
use courier_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use super::batcher::BatchQueue;
use super::executor::DeliveryExecutor;
use crate::channels::{DeliveryLane, TransportRouter};
use crate::error::{NotificationError, Result};
use crate::models::NewNotification;
use crate::store::NotificationStore;
use crate::template::{TemplateRepository, render};

/// 分发请求
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub template_name: String,
    pub user_id: String,
    pub variables: Variables,
    /// 覆盖模板的默认优先级
    pub priority: Option<Priority>,
    /// 计划投递时间，未来时间由到期扫描负责投递
    pub scheduled_for: Option<DateTime<Utc>>,
    /// 附加到通知 data 的业务数据，与模板变量同名时覆盖变量
    pub data: Variables,
    pub tags: BTreeSet<String>,
    pub group_id: Option<String>,
    pub group_order: Option<i64>,
}

impl DispatchRequest {
    pub fn new(
        template_name: impl Into<String>,
        user_id: impl Into<String>,
        variables: Variables,
    ) -> Self {
        Self {
            template_name: template_name.into(),
            user_id: user_id.into(),
            variables,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>, order: i64) -> Self {
        self.group_id = Some(group_id.into());
        self.group_order = Some(order);
        self
    }
}

pub struct DispatchPipeline {
    templates: Arc<dyn TemplateRepository>,
    store: Arc<NotificationStore>,
    executor: Arc<DeliveryExecutor>,
    batch_queue: Option<BatchQueue>,
}

impl DispatchPipeline {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        store: Arc<NotificationStore>,
        executor: Arc<DeliveryExecutor>,
    ) -> Self {
        Self {
            templates,
            store,
            executor,
            batch_queue: None,
        }
    }

    /// 为 low / normal 优先级启用批量通道
    pub fn with_batch_queue(mut self, queue: BatchQueue) -> Self {
        self.batch_queue = Some(queue);
        self
    }

    /// 按模板分发通知
    pub async fn dispatch(
        &self,
        template_name: &str,
        user_id: &str,
        variables: Variables,
        priority: Option<Priority>,
    ) -> Result<String> {
        let mut request = DispatchRequest::new(template_name, user_id, variables);
        request.priority = priority;
        self.dispatch_request(request).await
    }

    /// 完整形式的分发
    #[instrument(skip(self, request), fields(template = %request.template_name, user_id = %request.user_id))]
    pub async fn dispatch_request(&self, request: DispatchRequest) -> Result<String> {
        let template = match self.templates.get(&request.template_name).await? {
            Some(template) => template,
            None => {
                metrics::record_dispatch(&request.template_name, "-", "template_not_found");
                return Err(NotificationError::TemplateNotFound(request.template_name));
            }
        };

        let missing: Vec<String> = template
            .placeholders()
            .into_iter()
            .filter(|name| !request.variables.contains_key(name))
            .collect();
        if !missing.is_empty() {
            warn!(template = %template.name, ?missing, "模板变量未提供，按空字符串渲染");
        }

        let rendered = render(&template, &request.variables);
        let priority = request.priority.unwrap_or(template.default_priority);

        let mut data = request.variables;
        data.extend(request.data);

        let new = NewNotification {
            user_id: request.user_id,
            notification_type: Some(template.notification_type),
            priority,
            title: rendered.title,
            body: rendered.body,
            data,
            scheduled_for: request.scheduled_for,
            tags: request.tags,
            actions: template.default_actions.clone(),
            group_id: request.group_id,
            group_order: request.group_order,
            idempotency_key: None,
        };

        let id = match self.store.create(new).await {
            Ok(id) => id,
            Err(e) => {
                metrics::record_dispatch(&template.name, priority.as_str(), "rejected");
                return Err(e);
            }
        };
        metrics::record_dispatch(&template.name, priority.as_str(), "created");

        if request.scheduled_for.is_some_and(|at| at > Utc::now()) {
            info!(notification_id = %id, scheduled_for = ?request.scheduled_for, "计划通知已创建，等待到期扫描");
            return Ok(id);
        }

        let lane = TransportRouter::lane_for(priority);
        if lane == DeliveryLane::Batched
            && let Some(queue) = &self.batch_queue
            && queue.enqueue(&id).await
        {
            return Ok(id);
        }

        if let Err(e) = self.executor.deliver(&id).await {
            error!(notification_id = %id, error = %e, "首次投递出错，由到期扫描重试");
        }
        Ok(id)
    }
}
