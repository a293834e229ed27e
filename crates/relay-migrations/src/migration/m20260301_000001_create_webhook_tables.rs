use sea_orm_migration::prelude::*;

/// Webhooks, the durable delivery queue, the delivery audit trail and the
/// dead letter store. Child tables carry `webhook_id` without a foreign key
/// so that audit rows outlive a deleted webhook.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========================================
        // WEBHOOKS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(Webhooks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Webhooks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Webhooks::Url).string().not_null())
                    .col(ColumnDef::new(Webhooks::Secret).text().not_null())
                    .col(
                        ColumnDef::new(Webhooks::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Webhooks::Events).text().not_null())
                    .col(
                        ColumnDef::new(Webhooks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Webhooks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhooks_active")
                    .table(Webhooks::Table)
                    .col(Webhooks::Active)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // WEBHOOK_QUEUE_ITEMS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(WebhookQueueItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookQueueItems::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookQueueItems::WebhookId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookQueueItems::Event).string().not_null())
                    .col(ColumnDef::new(WebhookQueueItems::Payload).text().not_null())
                    .col(
                        ColumnDef::new(WebhookQueueItems::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookQueueItems::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookQueueItems::MaxRetries)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookQueueItems::ScheduledFor)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookQueueItems::ClaimedBy).string().null())
                    .col(
                        ColumnDef::new(WebhookQueueItems::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookQueueItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookQueueItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookQueueItems::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim scan: unclaimed, undeleted, due, ordered by priority
        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_queue_items_claimable")
                    .table(WebhookQueueItems::Table)
                    .col(WebhookQueueItems::DeletedAt)
                    .col(WebhookQueueItems::ClaimedBy)
                    .col(WebhookQueueItems::ScheduledFor)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_queue_items_priority")
                    .table(WebhookQueueItems::Table)
                    .col(WebhookQueueItems::Priority)
                    .col(WebhookQueueItems::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // WEBHOOK_DELIVERIES TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(WebhookDeliveries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookDeliveries::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::WebhookId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookDeliveries::Event).string().not_null())
                    .col(ColumnDef::new(WebhookDeliveries::Payload).text().not_null())
                    .col(
                        ColumnDef::new(WebhookDeliveries::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::StatusCode)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::ResponseBody)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::ErrorMessage)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::AttemptCount)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::IdempotencyKey)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookDeliveries::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_deliveries_webhook_id")
                    .table(WebhookDeliveries::Table)
                    .col(WebhookDeliveries::WebhookId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_deliveries_idempotency_key")
                    .table(WebhookDeliveries::Table)
                    .col(WebhookDeliveries::IdempotencyKey)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // WEBHOOK_DEAD_LETTERS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(WebhookDeadLetters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookDeadLetters::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::WebhookId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookDeadLetters::Event).string().not_null())
                    .col(ColumnDef::new(WebhookDeadLetters::Payload).text().not_null())
                    .col(
                        ColumnDef::new(WebhookDeadLetters::FailureReason)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::LastAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::DeliveryAttempts)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_dead_letters_webhook_id")
                    .table(WebhookDeadLetters::Table)
                    .col(WebhookDeadLetters::WebhookId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_dead_letters_created_at")
                    .table(WebhookDeadLetters::Table)
                    .col(WebhookDeadLetters::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Indexes go with their tables
        manager
            .drop_table(
                Table::drop()
                    .table(WebhookDeadLetters::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(WebhookDeliveries::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(WebhookQueueItems::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Webhooks::Table).if_exists().to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Webhooks {
    Table,
    Id,
    Url,
    Secret,
    Active,
    Events,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WebhookQueueItems {
    Table,
    Id,
    WebhookId,
    Event,
    Payload,
    Priority,
    RetryCount,
    MaxRetries,
    ScheduledFor,
    ClaimedBy,
    ClaimedAt,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum WebhookDeliveries {
    Table,
    Id,
    WebhookId,
    Event,
    Payload,
    Status,
    StatusCode,
    ResponseBody,
    ErrorMessage,
    AttemptCount,
    IdempotencyKey,
    CreatedAt,
    DeliveredAt,
}

#[derive(DeriveIden)]
enum WebhookDeadLetters {
    Table,
    Id,
    WebhookId,
    Event,
    Payload,
    FailureReason,
    LastAttemptAt,
    DeliveryAttempts,
    CreatedAt,
}
