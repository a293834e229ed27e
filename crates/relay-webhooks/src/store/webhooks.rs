use super::WebhookRegistry;
use crate::error::WebhookError;
use crate::events::WebhookEventType;
use crate::models::Webhook;
use async_trait::async_trait;
use relay_core::EncryptionService;
use relay_entities::webhooks;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use std::sync::Arc;
use tracing::info;

/// Request to register a new webhook
#[derive(Debug, Clone)]
pub struct CreateWebhookRequest {
    pub url: String,
    /// Plaintext, encrypted before it is stored
    pub secret: String,
    pub events: Vec<WebhookEventType>,
    pub active: bool,
}

/// Request to update a webhook
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Option<Vec<WebhookEventType>>,
    pub active: Option<bool>,
}

/// Webhook registry backed by the `webhooks` table
pub struct SeaOrmWebhookRegistry {
    db: Arc<DatabaseConnection>,
    encryption_service: Arc<EncryptionService>,
}

impl SeaOrmWebhookRegistry {
    pub fn new(db: Arc<DatabaseConnection>, encryption_service: Arc<EncryptionService>) -> Self {
        Self {
            db,
            encryption_service,
        }
    }

    /// Create a new webhook
    pub async fn create_webhook(
        &self,
        request: CreateWebhookRequest,
    ) -> Result<Webhook, WebhookError> {
        let encrypted_secret = self.encryption_service.encrypt_string(&request.secret)?;
        let events_json = serde_json::to_string(&request.events)?;

        let webhook = webhooks::ActiveModel {
            url: Set(request.url),
            secret: Set(encrypted_secret),
            events: Set(events_json),
            active: Set(request.active),
            ..Default::default()
        };

        let result = webhook.insert(self.db.as_ref()).await?;
        info!(webhook_id = result.id, url = %result.url, "Created webhook");
        Webhook::try_from(result)
    }

    /// Update a webhook
    pub async fn update_webhook(
        &self,
        webhook_id: i32,
        request: UpdateWebhookRequest,
    ) -> Result<Option<Webhook>, WebhookError> {
        let webhook = webhooks::Entity::find_by_id(webhook_id)
            .one(self.db.as_ref())
            .await?;

        let Some(webhook) = webhook else {
            return Ok(None);
        };

        let mut active_model: webhooks::ActiveModel = webhook.into();

        if let Some(url) = request.url {
            active_model.url = Set(url);
        }

        if let Some(secret) = request.secret {
            active_model.secret = Set(self.encryption_service.encrypt_string(&secret)?);
        }

        if let Some(events) = request.events {
            active_model.events = Set(serde_json::to_string(&events)?);
        }

        if let Some(active) = request.active {
            active_model.active = Set(active);
        }

        let result = active_model.update(self.db.as_ref()).await?;
        info!(webhook_id, "Updated webhook");
        Ok(Some(Webhook::try_from(result)?))
    }

    /// Delete a webhook
    pub async fn delete_webhook(&self, webhook_id: i32) -> Result<bool, WebhookError> {
        let result = webhooks::Entity::delete_by_id(webhook_id)
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// List all webhooks, newest first
    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, WebhookError> {
        webhooks::Entity::find()
            .order_by_desc(webhooks::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Webhook::try_from)
            .collect()
    }
}

#[async_trait]
impl WebhookRegistry for SeaOrmWebhookRegistry {
    async fn get_webhook_by_id(&self, id: i32) -> Result<Option<Webhook>, WebhookError> {
        webhooks::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Webhook::try_from)
            .transpose()
    }

    async fn get_webhooks_by_event(
        &self,
        event: WebhookEventType,
    ) -> Result<Vec<Webhook>, WebhookError> {
        let models = webhooks::Entity::find()
            .filter(webhooks::Column::Active.eq(true))
            .order_by_asc(webhooks::Column::Id)
            .all(self.db.as_ref())
            .await?;

        let mut subscribed = Vec::new();
        for model in models {
            let webhook = Webhook::try_from(model)?;
            if webhook.subscribes_to(event) {
                subscribed.push(webhook);
            }
        }
        Ok(subscribed)
    }
}
