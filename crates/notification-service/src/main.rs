//! 通知分发服务入口
//!
//! 装配通知运行时，启动到期扫描，并把实时事件写入日志，直到收到 Ctrl-C。

use anyhow::Result;
use courier_shared::{config::AppConfig, observability};
use notification_service::NotificationRuntime;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，失败时退回默认值
    let config = AppConfig::load("notification-service").unwrap_or_else(|e| {
        eprintln!("配置加载失败，使用默认配置: {e}");
        AppConfig::default()
    });

    // 2. 初始化日志与指标
    let mut obs_config = config.observability.clone();
    obs_config.service_name = config.service_name.clone();
    let _guard = observability::init(&obs_config)?;

    info!(environment = %config.environment, "Starting notification-service...");

    // 3. 装配运行时
    let runtime = NotificationRuntime::init(&config).await?;

    // 4. 记录实时事件，模拟在线设备订阅
    let mut events = runtime.publisher().subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    notification_id = %event.notification_id,
                    user_id = %event.user_id,
                    notification_type = %event.notification_type,
                    "通知已发送"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "事件订阅落后，部分事件被丢弃"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    signal::ctrl_c().await?;
    info!("收到关闭信号，正在停止...");

    runtime.shutdown().await;
    listener.abort();
    Ok(())
}
