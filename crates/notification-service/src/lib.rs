//! 通知分发服务
//!
//! 将业务事件（新配送单、保养到期、油量不足、聊天消息）渲染为通知，
//! 写入通知存储并按优先级选择渠道投递，失败后按指数退避重试。
//!
//! ## 模块划分
//!
//! - `template`: 模板渲染与模板仓储
//! - `store`: 通知生命周期状态机，按 id 串行化写操作
//! - `dispatch`: 分发流水线、投递执行器、批量通道与到期扫描
//! - `channels`: 投递渠道与路由
//! - `publisher`: 通知发送成功后的实时广播

pub mod channels;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod publisher;
pub mod repository;
pub mod runtime;
pub mod store;
pub mod template;

pub use dispatch::{DeliveryExecutor, DeliveryOutcome, DispatchPipeline, DispatchRequest};
pub use error::{NotificationError, Result};
pub use models::{NewNotification, Notification, NotificationFilter, NotificationTemplate};
pub use runtime::NotificationRuntime;
pub use store::NotificationStore;
