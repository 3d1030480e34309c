//! 共享库
//!
//! 包含通知服务端与设备端共用的配置、错误处理、领域枚举、重试策略、
//! 定时任务调度以及可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod retry;
pub mod scheduler;
pub mod test_utils;
