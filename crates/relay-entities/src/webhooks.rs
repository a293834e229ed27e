use async_trait::async_trait;
use relay_core::DBDateTime;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "webhooks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub url: String,
    /// AES-256-GCM ciphertext, decrypted only when signing
    #[sea_orm(column_type = "Text")]
    pub secret: String,
    pub active: bool,
    /// JSON array of subscribed event type strings
    #[sea_orm(column_type = "Text")]
    pub events: String,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::webhook_deliveries::Entity")]
    Deliveries,
    #[sea_orm(has_many = "super::webhook_queue_items::Entity")]
    QueueItems,
    #[sea_orm(has_many = "super::webhook_dead_letters::Entity")]
    DeadLetters,
}

impl Related<super::webhook_deliveries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deliveries.def()
    }
}

impl Related<super::webhook_queue_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueItems.def()
    }
}

impl Related<super::webhook_dead_letters::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeadLetters.def()
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
            if self.active.is_not_set() {
                self.active = Set(true);
            }
        }
        self.updated_at = Set(now);

        Ok(self)
    }
}
