use super::DeliveryStore;
use crate::error::WebhookError;
use crate::models::{Delivery, DeliveryCompletion, DeliveryStatus, NewDelivery};
use async_trait::async_trait;
use chrono::Utc;
use relay_entities::webhook_deliveries::{self, Column, Entity};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use std::sync::Arc;

/// Delivery audit store backed by the `webhook_deliveries` table
pub struct SeaOrmDeliveryStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmDeliveryStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Delivery history for a webhook, newest first
    pub async fn get_deliveries(
        &self,
        webhook_id: i32,
        limit: u64,
    ) -> Result<Vec<Delivery>, WebhookError> {
        Entity::find()
            .filter(Column::WebhookId.eq(webhook_id))
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Delivery::try_from)
            .collect()
    }
}

#[async_trait]
impl DeliveryStore for SeaOrmDeliveryStore {
    async fn create(&self, delivery: NewDelivery) -> Result<Delivery, WebhookError> {
        let record = webhook_deliveries::ActiveModel {
            webhook_id: Set(delivery.webhook_id),
            event: Set(delivery.event.as_str().to_string()),
            payload: Set(serde_json::to_string(&delivery.payload)?),
            status: Set(DeliveryStatus::Pending.as_str().to_string()),
            attempt_count: Set(i32::try_from(delivery.attempt_count).unwrap_or(i32::MAX)),
            idempotency_key: Set(delivery.idempotency_key),
            ..Default::default()
        };

        let model = record.insert(self.db.as_ref()).await?;
        Delivery::try_from(model)
    }

    async fn complete(
        &self,
        id: i32,
        completion: DeliveryCompletion,
    ) -> Result<Delivery, WebhookError> {
        let record = webhook_deliveries::ActiveModel {
            id: Set(id),
            status: Set(completion.status.as_str().to_string()),
            status_code: Set(Some(i32::from(completion.status_code))),
            response_body: Set(completion.response_body),
            error_message: Set(completion.error_message),
            delivered_at: Set(Some(Utc::now())),
            ..Default::default()
        };

        let model = record.update(self.db.as_ref()).await?;
        Delivery::try_from(model)
    }

    async fn find_successful_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Delivery>, WebhookError> {
        Entity::find()
            .filter(Column::IdempotencyKey.eq(key))
            .filter(Column::Status.eq(DeliveryStatus::Success.as_str()))
            .order_by_asc(Column::Id)
            .one(self.db.as_ref())
            .await?
            .map(Delivery::try_from)
            .transpose()
    }

    async fn fail_pending(
        &self,
        webhook_id: i32,
        idempotency_key: &str,
        error_message: &str,
    ) -> Result<u64, WebhookError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(DeliveryStatus::Failed.as_str()))
            .col_expr(Column::StatusCode, Expr::value(0))
            .col_expr(Column::ErrorMessage, Expr::value(error_message))
            .col_expr(Column::DeliveredAt, Expr::value(Utc::now()))
            .filter(Column::WebhookId.eq(webhook_id))
            .filter(Column::IdempotencyKey.eq(idempotency_key))
            .filter(Column::Status.eq(DeliveryStatus::Pending.as_str()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    async fn list_failed(
        &self,
        webhook_id: i32,
        idempotency_key: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Delivery>, WebhookError> {
        let mut query = Entity::find()
            .filter(Column::WebhookId.eq(webhook_id))
            .filter(Column::Status.eq(DeliveryStatus::Failed.as_str()));

        if let Some(key) = idempotency_key {
            query = query.filter(Column::IdempotencyKey.eq(key));
        }

        let mut failed = query
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Delivery::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        failed.reverse();
        Ok(failed)
    }
}
