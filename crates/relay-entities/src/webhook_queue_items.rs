use async_trait::async_trait;
use relay_core::DBDateTime;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_queue_items")]
pub struct Model {
    /// Caller-generated UUID so that enqueue is idempotent
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub webhook_id: i32,
    pub event: String,
    /// Serialized webhook payload (JSON)
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_for: DBDateTime,
    /// Worker currently holding the claim, NULL when claimable
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DBDateTime>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
    pub deleted_at: Option<DBDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::webhooks::Entity",
        from = "Column::WebhookId",
        to = "super::webhooks::Column::Id"
    )]
    Webhook,
}

impl Related<super::webhooks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Webhook.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.retry_count.is_not_set() {
                self.retry_count = Set(0);
            }
        }
        self.updated_at = Set(now);

        Ok(self)
    }
}
