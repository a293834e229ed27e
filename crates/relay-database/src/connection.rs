//! Database connection management

use relay_core::{DatabaseConfig, ServiceError, ServiceResult};
use relay_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tracing::{debug, info};

pub type DbConnection = DatabaseConnection;

/// Connect and bring the schema up to date.
pub async fn establish_connection(config: &DatabaseConfig) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(config.url.clone());
    opt.sqlx_logging(false);
    // In-memory sqlite is private per connection, keep it to one
    if config.url.starts_with("sqlite::memory:") {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections);
    }

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    debug!("Running database migrations");
    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    info!("Database connection established");
    Ok(Arc::new(db))
}
