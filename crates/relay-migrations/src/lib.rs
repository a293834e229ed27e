//! Database migrations for the relay webhook tables

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;
