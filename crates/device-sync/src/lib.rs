//! 设备端通知同步
//!
//! 运行在司机 / 客户端设备上，负责：
//!
//! - `sync`: 离线期间的已读、删除等变更写入本地队列，网络恢复后按顺序回放
//! - `grouping`: 同组通知折叠为一条滚动摘要
//! - `badge`: 按分类维护未读角标，并同步到系统图标
//! - `inbox`: 把接收、已读、删除串联到上述组件
//!
//! 本地持久化使用 SQLite，服务端通过 `RemoteNotificationApi` 访问。

pub mod badge;
pub mod connectivity;
pub mod envelope;
pub mod error;
pub mod grouping;
pub mod inbox;
pub mod remote;
pub mod runtime;
pub mod storage;
pub mod sync;

pub use badge::{BadgeCounter, BadgeCounts, BadgeSurface, LoggingBadgeSurface};
pub use connectivity::ConnectivityMonitor;
pub use envelope::{EnvelopePayload, LifecycleAction, LifecycleKind, OfflineEnvelope, OutgoingNotification};
pub use error::{Result, SyncError};
pub use grouping::{GroupExpiryTask, GroupManager, GroupSummary, LoggingPresenter, SummaryPresenter};
pub use inbox::{DeviceInbox, InboundNotification};
pub use remote::{HttpNotificationRemote, RemoteNotificationApi};
pub use runtime::{DevicePlatform, DeviceRuntime};
pub use storage::{LocalStore, MemoryLocalStore, SqliteLocalStore};
pub use sync::{DrainReport, OfflineSynchronizer};
