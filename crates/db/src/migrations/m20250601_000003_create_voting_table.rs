//! Create voting table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Voting::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Voting::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Voting::Title).string().not_null())
                    .col(ColumnDef::new(Voting::Kind).string().not_null())
                    .col(
                        ColumnDef::new(Voting::Status)
                            .string()
                            .not_null()
                            .default("ACTIVE"),
                    )
                    .col(ColumnDef::new(Voting::CreatedBy).big_integer().not_null())
                    .col(ColumnDef::new(Voting::FinishedAt).big_integer().not_null())
                    .col(ColumnDef::new(Voting::MovieId).big_integer().null())
                    .col(ColumnDef::new(Voting::SessionId).integer().null())
                    .col(
                        ColumnDef::new(Voting::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Voting::Table, Voting::MovieId)
                            .to(Movie::Table, Movie::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Voting::Table, Voting::SessionId)
                            .to(Session::Table, Session::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_voting_status")
                    .table(Voting::Table)
                    .col(Voting::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_voting_session_id")
                    .table(Voting::Table)
                    .col(Voting::SessionId)
                    .col(Voting::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Voting::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Voting {
    Table,
    Id,
    Title,
    Kind,
    Status,
    CreatedBy,
    FinishedAt,
    MovieId,
    SessionId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Movie {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Session {
    Table,
    Id,
}
