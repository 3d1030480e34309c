//! PostgreSQL 仓储集成测试
//!
//! 需要真实数据库，默认忽略。
//!
//! ## 运行方式
//!
//! ```bash
//! TEST_DATABASE_URL=postgres://... cargo test --test postgres_repository_test -- --ignored
//! ```

use std::sync::Arc;

use chrono::Utc;
use courier_shared::events::{NotificationStatus, NotificationType, Priority};
use courier_shared::retry::RetryPolicy;
use courier_shared::test_utils::{delivery_variables, test_database_config, test_user_id};
use notification_service::models::{NewNotification, NotificationFilter};
use notification_service::publisher::BroadcastPublisher;
use notification_service::repository::{NotificationRepository, PgNotificationRepository};
use notification_service::template::{PgTemplateRepository, TemplateRepository};
use notification_service::NotificationStore;
use sqlx::PgPool;

async fn setup() -> PgPool {
    let config = test_database_config();
    let pool = PgPool::connect(&config.url).await.expect("数据库连接失败");
    PgNotificationRepository::migrate(&pool).await.expect("迁移失败");
    pool
}

#[tokio::test]
#[ignore]
async fn test_insert_get_and_cas() {
    let pool = setup().await;
    let repo = PgNotificationRepository::new(pool);

    let mut new = NewNotification::new(test_user_id(), NotificationType::Delivery, "t", "b")
        .with_priority(Priority::High);
    new.data = delivery_variables("DEL1", "x");
    new.tags.insert("fleet".to_string());
    let n = new.into_notification(Utc::now()).unwrap();
    repo.insert(&n).await.unwrap();

    let loaded = repo.get(&n.id).await.unwrap().unwrap();
    assert_eq!(loaded.priority, Priority::High);
    assert_eq!(loaded.data, n.data);
    assert!(loaded.tags.contains("fleet"));

    let mut updated = loaded.clone();
    updated.status = NotificationStatus::Sent;
    updated.version += 1;
    assert!(repo.compare_and_swap(&updated, loaded.version).await.unwrap());
    // 旧版本号再次写入失败
    assert!(!repo.compare_and_swap(&updated, loaded.version).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_store_lifecycle_and_due_query() {
    let pool = setup().await;
    let store = NotificationStore::new(
        Arc::new(PgNotificationRepository::new(pool)),
        Arc::new(BroadcastPublisher::default()),
    );
    let user = test_user_id();

    let id = store
        .create(NewNotification::new(&user, NotificationType::Message, "t", "b"))
        .await
        .unwrap();
    let failed = store
        .mark_failed(&id, "boom", &RetryPolicy::immediate(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, NotificationStatus::Pending);
    assert_eq!(failed.retry_count, 1);

    let due = store
        .query(&NotificationFilter {
            user_id: Some(user.clone()),
            ..NotificationFilter::due(Utc::now(), 10)
        })
        .await
        .unwrap();
    assert_eq!(due.len(), 1);

    store.mark_sent(&id).await.unwrap();
    let read = store.mark_read(&id).await.unwrap();
    assert!(read.read);
    let deleted = store.delete(&id).await.unwrap();
    assert_eq!(deleted.status, NotificationStatus::Deleted);
    // CHECK 约束要求删除时清除已读标记
    assert!(!deleted.read);
}

#[tokio::test]
#[ignore]
async fn test_idempotency_key_is_unique() {
    let pool = setup().await;
    let store = NotificationStore::new(
        Arc::new(PgNotificationRepository::new(pool)),
        Arc::new(BroadcastPublisher::default()),
    );
    let user = test_user_id();
    let key = format!("env-{user}");

    let first = store
        .create(NewNotification::new(&user, NotificationType::Message, "t", "b").with_idempotency_key(&key))
        .await
        .unwrap();
    let replay = store
        .create(NewNotification::new(&user, NotificationType::Message, "t", "b").with_idempotency_key(&key))
        .await
        .unwrap();
    assert_eq!(first, replay);

    let all = store
        .query(&NotificationFilter::by_user_status(&user, NotificationStatus::Pending))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_template_upsert_roundtrip() {
    let pool = setup().await;
    let repo = PgTemplateRepository::new(pool);

    for template in notification_service::template::default_templates() {
        repo.upsert(&template).await.unwrap();
    }
    let tpl = repo.get("new_delivery").await.unwrap().unwrap();
    assert_eq!(tpl.default_priority, Priority::High);
    assert_eq!(tpl.default_actions.len(), 2);
}
