//! 服务装配
//!
//! 根据配置组装仓储、渠道、投递执行器与分发流水线，并启动后台任务
//! （到期扫描、批量通道）。数据库地址为空时使用内存仓储。

use std::sync::Arc;
use std::time::Duration;

use courier_shared::config::AppConfig;
use courier_shared::retry::{RetryPolicy, retry_with_policy};
use courier_shared::scheduler::spawn_scheduled;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channels::{HttpPushTransport, InAppTransport, SmsTransport, TransportRouter};
use crate::dispatch::{BatchQueue, DeliveryExecutor, DispatchPipeline, DueNotificationSweeper};
use crate::error::Result;
use crate::publisher::BroadcastPublisher;
use crate::repository::{
    InMemoryNotificationRepository, NotificationRepository, PgNotificationRepository,
};
use crate::store::NotificationStore;
use crate::template::{InMemoryTemplateRepository, PgTemplateRepository, TemplateRepository};

pub struct NotificationRuntime {
    pipeline: Arc<DispatchPipeline>,
    store: Arc<NotificationStore>,
    executor: Arc<DeliveryExecutor>,
    templates: Arc<dyn TemplateRepository>,
    publisher: Arc<BroadcastPublisher>,
    pool: Option<PgPool>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl NotificationRuntime {
    /// 按配置初始化并启动后台任务
    pub async fn init(config: &AppConfig) -> Result<Self> {
        let push = HttpPushTransport::new(&config.push, config.dispatch.delivery_timeout())?;
        let router = TransportRouter::new()
            .register(Arc::new(push))
            .register(Arc::new(InAppTransport::new()))
            .register(Arc::new(SmsTransport::new()));

        if config.database.url.is_empty() {
            warn!("未配置数据库地址，使用内存存储，重启后数据丢失");
            return Ok(Self::with_components(
                Arc::new(InMemoryTemplateRepository::with_defaults()),
                Arc::new(InMemoryNotificationRepository::new()),
                router,
                config,
            ));
        }

        let pool = connect(config).await?;
        PgNotificationRepository::migrate(&pool).await?;
        info!("数据库迁移完成");

        let mut runtime = Self::with_components(
            Arc::new(PgTemplateRepository::new(pool.clone())),
            Arc::new(PgNotificationRepository::new(pool.clone())),
            router,
            config,
        );
        runtime.pool = Some(pool);
        Ok(runtime)
    }

    /// 用给定组件装配，测试中可注入 mock 渠道
    pub fn with_components(
        templates: Arc<dyn TemplateRepository>,
        repo: Arc<dyn NotificationRepository>,
        router: TransportRouter,
        config: &AppConfig,
    ) -> Self {
        let publisher = Arc::new(BroadcastPublisher::default());
        let store = Arc::new(NotificationStore::new(repo, publisher.clone()));
        let executor = Arc::new(DeliveryExecutor::new(
            store.clone(),
            router,
            RetryPolicy::from(&config.dispatch),
            config.dispatch.delivery_timeout(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let mut pipeline = DispatchPipeline::new(templates.clone(), store.clone(), executor.clone());
        if config.dispatch.batching_enabled {
            let (queue, handle) = BatchQueue::spawn(
                executor.clone(),
                config.dispatch.batch_size,
                config.dispatch.batch_flush_interval(),
                shutdown_rx.clone(),
            );
            pipeline = pipeline.with_batch_queue(queue);
            handles.push(handle);
        }

        let sweeper = Arc::new(DueNotificationSweeper::new(
            store.clone(),
            executor.clone(),
            config.sweep.clone(),
        ));
        handles.push(spawn_scheduled(sweeper, shutdown_rx));

        info!(
            batching = config.dispatch.batching_enabled,
            max_attempts = config.dispatch.max_attempts,
            "通知服务已装配"
        );

        Self {
            pipeline: Arc::new(pipeline),
            store,
            executor,
            templates,
            publisher,
            pool: None,
            shutdown_tx,
            handles,
        }
    }

    pub fn pipeline(&self) -> Arc<DispatchPipeline> {
        self.pipeline.clone()
    }

    pub fn store(&self) -> Arc<NotificationStore> {
        self.store.clone()
    }

    pub fn executor(&self) -> Arc<DeliveryExecutor> {
        self.executor.clone()
    }

    pub fn templates(&self) -> Arc<dyn TemplateRepository> {
        self.templates.clone()
    }

    pub fn publisher(&self) -> Arc<BroadcastPublisher> {
        self.publisher.clone()
    }

    /// 通知后台任务退出并等待结束，批量通道中剩余的通知会在退出前投递
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "后台任务异常退出");
            }
        }
        if let Some(pool) = self.pool {
            pool.close().await;
            info!("数据库连接池已关闭");
        }
        info!("通知服务已停止");
    }
}

/// 连接数据库，启动阶段对连接失败做有限次重试
async fn connect(config: &AppConfig) -> Result<PgPool> {
    let db = &config.database;
    let policy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        multiplier: 2.0,
        jitter: true,
    };

    let pool = retry_with_policy(
        &policy,
        "connect_database",
        |e: &sqlx::Error| matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut),
        || {
            PgPoolOptions::new()
                .max_connections(db.max_connections)
                .min_connections(db.min_connections)
                .acquire_timeout(Duration::from_secs(db.connect_timeout_seconds))
                .idle_timeout(Duration::from_secs(db.idle_timeout_seconds))
                .connect(&db.url)
        },
    )
    .await?;

    info!("数据库连接池已创建");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::events::NotificationStatus;
    use courier_shared::events::VariableValue;
    use courier_shared::test_utils::{delivery_variables, test_dispatch_config, variables};

    #[tokio::test]
    async fn test_init_in_memory_and_dispatch() {
        let config = AppConfig {
            dispatch: test_dispatch_config(),
            ..AppConfig::default()
        };
        let runtime = NotificationRuntime::init(&config).await.unwrap();
        let mut events = runtime.publisher().subscribe();

        let id = runtime
            .pipeline()
            .dispatch("new_delivery", "driver-1", delivery_variables("DEL9", "1 Rue Y"), None)
            .await
            .unwrap();

        assert_eq!(
            runtime.store().get(&id).await.unwrap().status,
            NotificationStatus::Sent
        );
        let event = events.recv().await.unwrap();
        assert_eq!(event.notification_id, id);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_batched_lane_flushes_on_shutdown() {
        let mut config = AppConfig {
            dispatch: test_dispatch_config(),
            ..AppConfig::default()
        };
        config.dispatch.batching_enabled = true;
        config.dispatch.batch_size = 10;
        config.dispatch.batch_flush_ms = 60_000;

        let runtime = NotificationRuntime::init(&config).await.unwrap();
        let store = runtime.store();

        // new_message 默认 normal 优先级，走批量通道
        let id = runtime
            .pipeline()
            .dispatch(
                "new_message",
                "driver-1",
                variables([
                    ("senderName", VariableValue::from("Dispatch")),
                    ("preview", VariableValue::from("Rappel de la tournée")),
                ]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, NotificationStatus::Pending);

        runtime.shutdown().await;
        assert_eq!(store.get(&id).await.unwrap().status, NotificationStatus::Sent);
    }
}
