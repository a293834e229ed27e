use super::DeadLetterStore;
use crate::error::WebhookError;
use crate::models::DeadLetterItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_entities::webhook_dead_letters::{self, Column, Entity};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Dead letter store backed by the `webhook_dead_letters` table
pub struct SeaOrmDeadLetterStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmDeadLetterStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeadLetterStore for SeaOrmDeadLetterStore {
    async fn add(&self, item: &DeadLetterItem) -> Result<(), WebhookError> {
        let record = webhook_dead_letters::ActiveModel {
            id: Set(item.id.clone()),
            webhook_id: Set(item.webhook_id),
            event: Set(item.event.as_str().to_string()),
            payload: Set(serde_json::to_string(&item.payload)?),
            failure_reason: Set(item.failure_reason.clone()),
            last_attempt_at: Set(item.last_attempt_at),
            delivery_attempts: Set(serde_json::to_string(&item.delivery_attempts)?),
            created_at: Set(item.created_at),
        };

        record.insert(self.db.as_ref()).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, WebhookError> {
        let result = Entity::delete_by_id(id.to_string())
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DeadLetterItem>, WebhookError> {
        Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?
            .map(DeadLetterItem::try_from)
            .transpose()
    }

    async fn list(&self, webhook_id: Option<i32>) -> Result<Vec<DeadLetterItem>, WebhookError> {
        let mut query = Entity::find();
        if let Some(webhook_id) = webhook_id {
            query = query.filter(Column::WebhookId.eq(webhook_id));
        }

        query
            .order_by_desc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(DeadLetterItem::try_from)
            .collect()
    }

    async fn count(&self) -> Result<u64, WebhookError> {
        Ok(Entity::find().count(self.db.as_ref()).await?)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, WebhookError> {
        Ok(Entity::find()
            .filter(Column::CreatedAt.gte(since))
            .count(self.db.as_ref())
            .await?)
    }

    async fn count_by_webhook(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<i32, u64>, WebhookError> {
        let mut query = Entity::find()
            .select_only()
            .column(Column::WebhookId)
            .column_as(Expr::col(Column::Id).count(), "count");

        if let Some(since) = since {
            query = query.filter(Column::CreatedAt.gte(since));
        }

        let rows: Vec<(i32, i64)> = query
            .group_by(Column::WebhookId)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(webhook_id, count)| (webhook_id, u64::try_from(count).unwrap_or(0)))
            .collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, WebhookError> {
        let result = Entity::delete_many()
            .filter(Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
