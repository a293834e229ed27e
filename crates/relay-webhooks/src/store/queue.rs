use super::QueueStore;
use crate::error::WebhookError;
use crate::models::QueueItem;
use async_trait::async_trait;
use chrono::Utc;
use relay_entities::webhook_queue_items::{self, Column, Entity};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Queue store backed by the `webhook_queue_items` table.
///
/// Claims are recorded in `claimed_by`/`claimed_at`; removed rows keep a
/// `deleted_at` stamp and are invisible to every query.
pub struct SeaOrmQueueStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmQueueStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn to_active_model(item: &QueueItem) -> Result<webhook_queue_items::ActiveModel, WebhookError> {
        Ok(webhook_queue_items::ActiveModel {
            id: Set(item.id.clone()),
            webhook_id: Set(item.webhook_id),
            event: Set(item.event.as_str().to_string()),
            payload: Set(serde_json::to_string(&item.payload)?),
            priority: Set(item.priority),
            retry_count: Set(i32::try_from(item.retry_count).unwrap_or(i32::MAX)),
            max_retries: Set(i32::try_from(item.max_retries).unwrap_or(i32::MAX)),
            scheduled_for: Set(item.scheduled_for),
            claimed_by: Set(None),
            claimed_at: Set(None),
            created_at: Set(item.created_at),
            updated_at: Set(item.updated_at),
            deleted_at: Set(None),
        })
    }
}

#[async_trait]
impl QueueStore for SeaOrmQueueStore {
    async fn enqueue(&self, item: &QueueItem) -> Result<(), WebhookError> {
        let model = Self::to_active_model(item)?;

        let inserted = Entity::insert(model)
            .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned())
            .exec_without_returning(self.db.as_ref())
            .await?;

        if inserted == 0 {
            debug!(item_id = %item.id, "Queue item already present, enqueue skipped");
        }
        Ok(())
    }

    async fn dequeue_atomic(&self, worker_id: &str) -> Result<Option<QueueItem>, WebhookError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let candidate = Entity::find()
            .filter(Column::DeletedAt.is_null())
            .filter(Column::ClaimedBy.is_null())
            .filter(Column::ScheduledFor.lte(now))
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::ScheduledFor)
            .order_by_asc(Column::CreatedAt)
            .one(&txn)
            .await?;

        let Some(candidate) = candidate else {
            txn.commit().await?;
            return Ok(None);
        };

        // Only succeeds if nobody claimed the row since it was read
        let claimed = Entity::update_many()
            .col_expr(Column::ClaimedBy, Expr::value(worker_id))
            .col_expr(Column::ClaimedAt, Expr::value(now))
            .filter(Column::Id.eq(candidate.id.clone()))
            .filter(Column::ClaimedBy.is_null())
            .filter(Column::DeletedAt.is_null())
            .exec(&txn)
            .await?;

        txn.commit().await?;

        if claimed.rows_affected != 1 {
            debug!(item_id = %candidate.id, worker_id, "Lost claim race");
            return Ok(None);
        }

        let mut item = QueueItem::try_from(candidate)?;
        item.updated_at = now;
        Ok(Some(item))
    }

    async fn release(&self, id: &str) -> Result<(), WebhookError> {
        Entity::update_many()
            .col_expr(Column::ClaimedBy, Expr::value(Option::<String>::None))
            .col_expr(
                Column::ClaimedAt,
                Expr::value(Option::<chrono::DateTime<Utc>>::None),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::DeletedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn release_stale_claims(&self, max_age: Duration) -> Result<u64, WebhookError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| WebhookError::InvalidConfiguration(e.to_string()))?;
        let cutoff = Utc::now() - max_age;

        let result = Entity::update_many()
            .col_expr(Column::ClaimedBy, Expr::value(Option::<String>::None))
            .col_expr(
                Column::ClaimedAt,
                Expr::value(Option::<chrono::DateTime<Utc>>::None),
            )
            .filter(Column::DeletedAt.is_null())
            .filter(Column::ClaimedBy.is_not_null())
            .filter(Column::ClaimedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected > 0 {
            warn!(
                released = result.rows_affected,
                "Released abandoned queue claims"
            );
        }
        Ok(result.rows_affected)
    }

    async fn remove(&self, id: &str) -> Result<(), WebhookError> {
        let now = Utc::now();
        Entity::update_many()
            .col_expr(Column::DeletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::ClaimedBy, Expr::value(Option::<String>::None))
            .filter(Column::Id.eq(id))
            .filter(Column::DeletedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueueItem>, WebhookError> {
        Entity::find()
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::ScheduledFor)
            .order_by_asc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(QueueItem::try_from)
            .collect()
    }
}
