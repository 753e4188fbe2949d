//! Schema migrations for the sessions table.
//!
//! The default [`Migrator`] creates the `sessions` table. Applications that keep sessions in
//! a differently named table can run [`create_table_statement`] through their own migration.

pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_sessions_table;

pub use m20240101_000001_create_sessions_table::{create_indexes, create_table_statement};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    // Override the name of migration table to avoid conflicts
    fn migration_table_name() -> sea_orm::DynIden {
        Alias::new("laravel_sessions_seaorm_migrations").into_iden()
    }

    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240101_000001_create_sessions_table::Migration)]
    }
}
