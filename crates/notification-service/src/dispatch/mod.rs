//! 分发流水线
//!
//! - `pipeline`: 查找模板、渲染、创建记录、按优先级选择通道
//! - `executor`: 单条投递与失败后的退避重排
//! - `batcher`: low / normal 优先级的批量通道
//! - `sweeper`: 周期扫描到期记录，按批次投递

mod batcher;
mod executor;
mod pipeline;
mod sweeper;

pub use batcher::BatchQueue;
pub use executor::{DeliveryExecutor, DeliveryOutcome};
pub use pipeline::{DispatchPipeline, DispatchRequest};
pub use sweeper::DueNotificationSweeper;
