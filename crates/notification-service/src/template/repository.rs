//! 模板仓储
//!
//! 模板由管理端按名称增删改，分发流程只按名称读取。

use std::collections::HashMap;

use async_trait::async_trait;
use courier_shared::events::{NotificationAction, NotificationType, Priority};
use parking_lot::RwLock;
use sqlx::PgPool;
use sqlx::types::Json;

use crate::error::Result;
use crate::models::NotificationTemplate;

/// 模板仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<NotificationTemplate>>;
    async fn upsert(&self, template: &NotificationTemplate) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<NotificationTemplate>>;
}

// ---------------------------------------------------------------------------
// 内存实现
// ---------------------------------------------------------------------------

/// 内存模板仓储，用于本地运行与测试
#[derive(Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<String, NotificationTemplate>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置六类业务通知的默认模板
    pub fn with_defaults() -> Self {
        let repo = Self::new();
        {
            let mut templates = repo.templates.write();
            for template in default_templates() {
                templates.insert(template.name.clone(), template);
            }
        }
        repo
    }
}

/// 默认模板
pub fn default_templates() -> Vec<NotificationTemplate> {
    vec![
        NotificationTemplate::new(
            "new_delivery",
            NotificationType::Delivery,
            "Nouvelle livraison #{{deliveryId}}",
            "Une nouvelle livraison vous a été assignée : {{address}}",
        )
        .with_priority(Priority::High)
        .with_action("accept", "Accepter")
        .with_action("view", "Voir"),
        NotificationTemplate::new(
            "maintenance_due",
            NotificationType::Maintenance,
            "Maintenance prévue",
            "Le véhicule {{vehicleId}} doit passer en maintenance le {{dueDate}}",
        )
        .with_action("schedule", "Planifier"),
        NotificationTemplate::new(
            "low_fuel",
            NotificationType::Fuel,
            "Niveau de carburant bas",
            "Le véhicule {{vehicleId}} n'a plus que {{fuelLevel}}% de carburant",
        )
        .with_priority(Priority::High)
        .with_action("find_station", "Trouver une station"),
        NotificationTemplate::new(
            "new_message",
            NotificationType::Message,
            "Nouveau message de {{senderName}}",
            "{{preview}}",
        )
        .with_action("reply", "Répondre"),
        NotificationTemplate::new(
            "system_update",
            NotificationType::System,
            "Mise à jour système",
            "{{message}}",
        )
        .with_priority(Priority::Low),
        NotificationTemplate::new(
            "delivery_alert",
            NotificationType::Alert,
            "Alerte livraison #{{deliveryId}}",
            "{{message}}",
        )
        .with_priority(Priority::Urgent)
        .with_action("view", "Voir"),
    ]
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn get(&self, name: &str) -> Result<Option<NotificationTemplate>> {
        Ok(self.templates.read().get(name).cloned())
    }

    async fn upsert(&self, template: &NotificationTemplate) -> Result<()> {
        template.validate()?;
        self.templates
            .write()
            .insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.templates.write().remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<NotificationTemplate>> {
        let mut templates: Vec<_> = self.templates.read().values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL 实现
// ---------------------------------------------------------------------------

/// PostgreSQL 模板仓储
pub struct PgTemplateRepository {
    pool: PgPool,
}

/// 模板表行
#[derive(sqlx::FromRow)]
struct TemplateRow {
    name: String,
    notification_type: String,
    title_template: String,
    body_template: String,
    default_priority: String,
    default_actions: Json<Vec<NotificationAction>>,
}

impl TryFrom<TemplateRow> for NotificationTemplate {
    type Error = crate::error::NotificationError;

    fn try_from(row: TemplateRow) -> Result<Self> {
        Ok(Self {
            name: row.name,
            notification_type: row.notification_type.parse()?,
            title_template: row.title_template,
            body_template: row.body_template,
            default_priority: row.default_priority.parse()?,
            default_actions: row.default_actions.0,
        })
    }
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn get(&self, name: &str) -> Result<Option<NotificationTemplate>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT name, notification_type, title_template, body_template,
                   default_priority, default_actions
            FROM notification_templates
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NotificationTemplate::try_from).transpose()
    }

    async fn upsert(&self, template: &NotificationTemplate) -> Result<()> {
        template.validate()?;

        sqlx::query(
            r#"
            INSERT INTO notification_templates
                (name, notification_type, title_template, body_template,
                 default_priority, default_actions, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (name) DO UPDATE SET
                notification_type = EXCLUDED.notification_type,
                title_template = EXCLUDED.title_template,
                body_template = EXCLUDED.body_template,
                default_priority = EXCLUDED.default_priority,
                default_actions = EXCLUDED.default_actions,
                updated_at = NOW()
            "#,
        )
        .bind(&template.name)
        .bind(template.notification_type.as_str())
        .bind(&template.title_template)
        .bind(&template.body_template)
        .bind(template.default_priority.as_str())
        .bind(Json(&template.default_actions))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notification_templates WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<NotificationTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT name, notification_type, title_template, body_template,
                   default_priority, default_actions
            FROM notification_templates
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationTemplate::try_from).collect()
    }
}
