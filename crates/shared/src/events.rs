//! 通知领域模型
//!
//! 定义服务端与设备端共用的通知分类、优先级、生命周期状态、角标分类、
//! 模板变量的取值类型，以及通知发送成功后对外广播的实时事件。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CourierError;

// ---------------------------------------------------------------------------
// NotificationType: 通知分类
// ---------------------------------------------------------------------------

/// 通知分类
///
/// 封闭集合，模板和通知都必须属于其中之一。分类决定角标归属。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Delivery,
    Maintenance,
    Fuel,
    Message,
    System,
    Alert,
}

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        Self::Delivery,
        Self::Maintenance,
        Self::Fuel,
        Self::Message,
        Self::System,
        Self::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Maintenance => "maintenance",
            Self::Fuel => "fuel",
            Self::Message => "message",
            Self::System => "system",
            Self::Alert => "alert",
        }
    }

    /// 该分类计入哪个角标
    pub fn badge_category(&self) -> BadgeCategory {
        match self {
            Self::Delivery => BadgeCategory::Delivery,
            // 油量提醒属于车辆保养范畴
            Self::Maintenance | Self::Fuel => BadgeCategory::Maintenance,
            Self::Message => BadgeCategory::Message,
            Self::Alert | Self::System => BadgeCategory::Alert,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CourierError::Validation(format!("未知的通知类型: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Priority: 优先级
// ---------------------------------------------------------------------------

/// 通知优先级
///
/// high / urgent 走即时通道，不参与批量合并；low / normal 允许合并发送。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// 是否需要绕过批量合并立即投递
    pub fn is_expedited(&self) -> bool {
        matches!(self, Self::High | Self::Urgent)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(CourierError::Validation(format!("未知的优先级: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationStatus: 生命周期状态
// ---------------------------------------------------------------------------

/// 通知生命周期状态
///
/// 状态机：`pending → sent → read`，`pending → failed`（可重试时回到 pending），
/// 任意非终态 → `deleted`。`deleted` 为终态；重试耗尽的 `failed` 同样视为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Read,
    Failed,
    Deleted,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            "deleted" => Ok(Self::Deleted),
            other => Err(CourierError::Validation(format!("未知的通知状态: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// BadgeCategory: 角标分类
// ---------------------------------------------------------------------------

/// 设备端未读角标分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeCategory {
    Delivery,
    Maintenance,
    Message,
    Alert,
}

impl BadgeCategory {
    pub const ALL: [BadgeCategory; 4] = [
        Self::Delivery,
        Self::Maintenance,
        Self::Message,
        Self::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Maintenance => "maintenance",
            Self::Message => "message",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for BadgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<NotificationType> for BadgeCategory {
    fn from(value: NotificationType) -> Self {
        value.badge_category()
    }
}

// ---------------------------------------------------------------------------
// VariableValue: 模板变量与业务数据的取值类型
// ---------------------------------------------------------------------------

/// 模板变量 / 通知 data 的取值
///
/// 只允许少量标量类型，嵌套对象和数组在边界处即被拒绝，
/// 避免任意 JSON 结构流入模板渲染与持久化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for VariableValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// 变量表，按键排序保证渲染与序列化结果稳定
pub type Variables = BTreeMap<String, VariableValue>;

/// 从 JSON 对象构造变量表
///
/// 仅接受字符串、数字、布尔值；`null` 被忽略；对象和数组返回错误。
pub fn variables_from_json(value: &serde_json::Value) -> Result<Variables, CourierError> {
    let serde_json::Value::Object(map) = value else {
        return Err(CourierError::Validation("变量必须是 JSON 对象".to_string()));
    };

    let mut variables = Variables::new();
    for (key, raw) in map {
        let converted = match raw {
            serde_json::Value::Null => continue,
            serde_json::Value::Bool(b) => VariableValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => VariableValue::Integer(i),
                None => VariableValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => VariableValue::Text(s.clone()),
            serde_json::Value::Array(_) => {
                return Err(CourierError::UnsupportedValueKind {
                    key: key.clone(),
                    kind: "array".to_string(),
                });
            }
            serde_json::Value::Object(_) => {
                return Err(CourierError::UnsupportedValueKind {
                    key: key.clone(),
                    kind: "object".to_string(),
                });
            }
        };
        variables.insert(key.clone(), converted);
    }

    Ok(variables)
}

// ---------------------------------------------------------------------------
// NotificationAction: 通知操作按钮
// ---------------------------------------------------------------------------

/// 通知上的操作按钮描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
}

impl NotificationAction {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationEvent: 实时广播事件
// ---------------------------------------------------------------------------

/// 通知进入 `sent` 状态时广播给在线订阅者的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub notification_id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
