//! SQLite 本地存储

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use super::LocalStore;
use crate::envelope::{EnvelopePayload, OfflineEnvelope};
use crate::error::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS offline_envelopes (
        position   INTEGER PRIMARY KEY AUTOINCREMENT,
        id         TEXT NOT NULL UNIQUE,
        payload    TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_offline_envelopes_order
        ON offline_envelopes (created_at, position)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS device_state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

#[derive(Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct EnvelopeRow {
    id: String,
    payload: Json<EnvelopePayload>,
    created_at: DateTime<Utc>,
    position: i64,
}

impl From<EnvelopeRow> for OfflineEnvelope {
    fn from(row: EnvelopeRow) -> Self {
        Self {
            id: row.id,
            payload: row.payload.0,
            created_at: row.created_at,
            position: row.position,
        }
    }
}

impl SqliteLocalStore {
    /// 连接并建表，`url` 形如 `sqlite://device.db` 或 `sqlite::memory:`
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // 内存库每个连接各自独立，只能使用单连接且不能被回收
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!(url, "设备本地存储已就绪");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn append(
        &self,
        payload: &EnvelopePayload,
        created_at: DateTime<Utc>,
    ) -> Result<OfflineEnvelope> {
        let id = Uuid::now_v7().to_string();
        let position: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO offline_envelopes (id, payload, created_at)
            VALUES (?, ?, ?)
            RETURNING position
            "#,
        )
        .bind(&id)
        .bind(Json(payload))
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(OfflineEnvelope {
            id,
            payload: payload.clone(),
            created_at,
            position,
        })
    }

    async fn pending(&self) -> Result<Vec<OfflineEnvelope>> {
        let rows = sqlx::query_as::<_, EnvelopeRow>(
            r#"
            SELECT id, payload, created_at, position
            FROM offline_envelopes
            ORDER BY created_at ASC, position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OfflineEnvelope::from).collect())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM offline_envelopes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_envelopes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM device_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_state (key, value) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
