//! PostgreSQL 通知仓储

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_shared::events::{NotificationAction, Variables};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::NotificationRepository;
use crate::error::{NotificationError, Result};
use crate::models::{Notification, NotificationFilter};

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, notification_type, priority, title, body, data, status,
           read, read_at, scheduled_for, retry_count, last_retry_at, error,
           tags, actions, group_id, group_order, idempotency_key, created_at, updated_at, version
    FROM notifications
"#;

/// PostgreSQL 通知仓储
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 执行内置迁移脚本
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }
}

/// 通知表行
#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: String,
    user_id: String,
    notification_type: String,
    priority: String,
    title: String,
    body: String,
    data: Json<Variables>,
    status: String,
    read: bool,
    read_at: Option<DateTime<Utc>>,
    scheduled_for: Option<DateTime<Utc>>,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    error: Option<String>,
    tags: Vec<String>,
    actions: Json<Vec<NotificationAction>>,
    group_id: Option<String>,
    group_order: Option<i64>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = NotificationError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            notification_type: row.notification_type.parse()?,
            priority: row.priority.parse()?,
            title: row.title,
            body: row.body,
            data: row.data.0,
            status: row.status.parse()?,
            read: row.read,
            read_at: row.read_at,
            scheduled_for: row.scheduled_for,
            retry_count: row.retry_count.max(0) as u32,
            last_retry_at: row.last_retry_at,
            error: row.error,
            tags: row.tags.into_iter().collect::<BTreeSet<_>>(),
            actions: row.actions.0,
            group_id: row.group_id,
            group_order: row.group_order,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert(&self, n: &Notification) -> Result<String> {
        // 幂等键冲突时不写入；其他唯一约束（id）冲突仍然报错
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO notifications
                (id, user_id, notification_type, priority, title, body, data, status,
                 read, read_at, scheduled_for, retry_count, last_retry_at, error,
                 tags, actions, group_id, group_order, idempotency_key,
                 created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&n.id)
        .bind(&n.user_id)
        .bind(n.notification_type.as_str())
        .bind(n.priority.as_str())
        .bind(&n.title)
        .bind(&n.body)
        .bind(Json(&n.data))
        .bind(n.status.as_str())
        .bind(n.read)
        .bind(n.read_at)
        .bind(n.scheduled_for)
        .bind(n.retry_count as i32)
        .bind(n.last_retry_at)
        .bind(&n.error)
        .bind(n.tags.iter().cloned().collect::<Vec<_>>())
        .bind(Json(&n.actions))
        .bind(&n.group_id)
        .bind(n.group_order)
        .bind(&n.idempotency_key)
        .bind(n.created_at)
        .bind(n.updated_at)
        .bind(n.version)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        let existing: String =
            sqlx::query_scalar("SELECT id FROM notifications WHERE idempotency_key = $1")
                .bind(&n.idempotency_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(existing)
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Notification::try_from).transpose()
    }

    async fn compare_and_swap(&self, n: &Notification, expected_version: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $3, read = $4, read_at = $5, scheduled_for = $6,
                retry_count = $7, last_retry_at = $8, error = $9,
                updated_at = $10, version = $11
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(&n.id)
        .bind(expected_version)
        .bind(n.status.as_str())
        .bind(n.read)
        .bind(n.read_at)
        .bind(n.scheduled_for)
        .bind(n.retry_count as i32)
        .bind(n.last_retry_at)
        .bind(&n.error)
        .bind(n.updated_at)
        .bind(n.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn query(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(SELECT_COLUMNS);
        builder.push(" WHERE 1 = 1");

        if let Some(user_id) = &filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(now) = filter.due_before {
            builder
                .push(" AND scheduled_for IS NOT NULL AND scheduled_for <= ")
                .push_bind(now);
        }
        builder.push(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder
            .build_query_as::<NotificationRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }
}
