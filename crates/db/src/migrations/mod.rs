//! Database migrations.
//!
//! Schema migrations for the database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250601_000001_create_movie_table;
mod m20250601_000002_create_session_table;
mod m20250601_000003_create_voting_table;
mod m20250601_000004_create_poll_table;
mod m20250601_000005_create_vote_table;
mod m20250601_000006_create_schedule_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_movie_table::Migration),
            Box::new(m20250601_000002_create_session_table::Migration),
            Box::new(m20250601_000003_create_voting_table::Migration),
            Box::new(m20250601_000004_create_poll_table::Migration),
            Box::new(m20250601_000005_create_vote_table::Migration),
            Box::new(m20250601_000006_create_schedule_table::Migration),
        ]
    }
}
