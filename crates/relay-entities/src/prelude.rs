pub use super::webhook_dead_letters::Entity as WebhookDeadLetters;
pub use super::webhook_deliveries::Entity as WebhookDeliveries;
pub use super::webhook_queue_items::Entity as WebhookQueueItems;
pub use super::webhooks::Entity as Webhooks;
