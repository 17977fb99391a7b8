//! Schema migrations
//!
//! Run with the `migrate` binary of the app crate, or apply in tests through
//! `TestDatabase::fresh::<Migrator>()`.

use sea_orm_migration::prelude::*;

mod m20261018_000001_create_workflow_tables;
mod m20261018_000002_create_audit_and_notification_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261018_000001_create_workflow_tables::Migration),
            Box::new(m20261018_000002_create_audit_and_notification_tables::Migration),
        ]
    }
}
