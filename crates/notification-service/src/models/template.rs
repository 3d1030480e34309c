//! 通知模板

use courier_shared::events::{NotificationAction, NotificationType, Priority};
use serde::{Deserialize, Serialize};

use crate::error::{NotificationError, Result};
use crate::template::extract_variables;

/// 通知模板
///
/// 以 `name` 唯一标识，标题和正文中可包含 `{{variable}}` 占位符。
/// 由管理端维护，分发流程只读。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    pub name: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title_template: String,
    pub body_template: String,
    #[serde(default)]
    pub default_priority: Priority,
    #[serde(default)]
    pub default_actions: Vec<NotificationAction>,
}

impl NotificationTemplate {
    pub fn new(
        name: impl Into<String>,
        notification_type: NotificationType,
        title_template: impl Into<String>,
        body_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            notification_type,
            title_template: title_template.into(),
            body_template: body_template.into(),
            default_priority: Priority::default(),
            default_actions: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_action(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.default_actions.push(NotificationAction::new(id, label));
        self
    }

    /// 标题与正文中引用的变量名，按出现顺序去重
    pub fn placeholders(&self) -> Vec<String> {
        let mut names = extract_variables(&self.title_template);
        for name in extract_variables(&self.body_template) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// 校验模板字段
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(NotificationError::Validation("模板名称不能为空".to_string()));
        }
        if self.title_template.trim().is_empty() {
            return Err(NotificationError::Validation(format!(
                "模板 {} 的标题不能为空",
                self.name
            )));
        }
        if self.body_template.trim().is_empty() {
            return Err(NotificationError::Validation(format!(
                "模板 {} 的正文不能为空",
                self.name
            )));
        }
        Ok(())
    }
}

/// 渲染结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub title: String,
    pub body: String,
}
