//! Create vote table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vote::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Vote::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Vote::VotingId).integer().not_null())
                    .col(ColumnDef::new(Vote::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Vote::MovieId).big_integer().null())
                    .col(
                        ColumnDef::new(Vote::Rating)
                            .integer()
                            .null()
                            .check(Expr::col(Vote::Rating).between(1, 10)),
                    )
                    .col(
                        ColumnDef::new(Vote::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Vote::Table, Vote::VotingId)
                            .to(Voting::Table, Voting::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One vote per user and voting; repeated answers replace the row
        manager
            .create_index(
                Index::create()
                    .name("uq_vote_user_voting")
                    .table(Vote::Table)
                    .col(Vote::UserId)
                    .col(Vote::VotingId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_vote_voting_movie")
                    .table(Vote::Table)
                    .col(Vote::VotingId)
                    .col(Vote::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Vote::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Vote {
    Table,
    Id,
    VotingId,
    UserId,
    MovieId,
    Rating,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Voting {
    Table,
    Id,
}
