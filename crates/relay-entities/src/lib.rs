//! sea-orm entities for the webhook delivery tables

pub mod webhooks;
pub mod webhook_queue_items;
pub mod webhook_deliveries;
pub mod webhook_dead_letters;

pub mod prelude;
