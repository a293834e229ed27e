//! Test utilities for database integration tests
//!
//! Every `TestDatabase` is a private in-memory sqlite database with the
//! relay schema applied, so tests never share state.

use crate::DbConnection;
use relay_migrations::Migrator;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, Statement};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

/// In-memory test database
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    /// Connect to a fresh in-memory database without running migrations
    pub async fn new() -> anyhow::Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Create a test database and run migrations
    pub async fn with_migrations() -> anyhow::Result<Self> {
        let test_db = Self::new().await?;

        Migrator::up(test_db.db.as_ref(), None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(test_db)
    }

    /// Get a clone of the connection handle
    pub fn connection(&self) -> Arc<DbConnection> {
        self.db.clone()
    }

    /// Row count of a table, handy for asserting side effects
    pub async fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        let row = self
            .db
            .query_one(Statement::from_string(
                self.db.get_database_backend(),
                format!("SELECT COUNT(*) AS n FROM {}", table),
            ))
            .await?
            .ok_or_else(|| anyhow::anyhow!("no row returned for count on {}", table))?;

        Ok(row.try_get("", "n")?)
    }
}
