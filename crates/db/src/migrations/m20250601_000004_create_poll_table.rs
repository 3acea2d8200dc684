//! Create poll and `poll_option` tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Poll::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Poll::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Poll::ExternalPollId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Poll::ChatId).big_integer().not_null())
                    .col(ColumnDef::new(Poll::MessageId).integer().not_null())
                    .col(
                        ColumnDef::new(Poll::VotingId)
                            .integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Poll::Kind).string().not_null())
                    .col(
                        ColumnDef::new(Poll::Status)
                            .string()
                            .not_null()
                            .default("OPENED"),
                    )
                    .col(ColumnDef::new(Poll::MovieId).big_integer().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Poll::Table, Poll::VotingId)
                            .to(Voting::Table, Voting::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PollOption::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PollOption::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PollOption::PollId).integer().not_null())
                    .col(ColumnDef::new(PollOption::OptionIndex).integer().not_null())
                    .col(ColumnDef::new(PollOption::MovieId).big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(PollOption::Table, PollOption::PollId)
                            .to(Poll::Table, Poll::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(PollOption::Table, PollOption::MovieId)
                            .to(Movie::Table, Movie::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_poll_option_poll_index")
                    .table(PollOption::Table)
                    .col(PollOption::PollId)
                    .col(PollOption::OptionIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PollOption::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Poll::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Poll {
    Table,
    Id,
    ExternalPollId,
    ChatId,
    MessageId,
    VotingId,
    Kind,
    Status,
    MovieId,
}

#[derive(DeriveIden)]
enum PollOption {
    Table,
    Id,
    PollId,
    OptionIndex,
    MovieId,
}

#[derive(DeriveIden)]
enum Voting {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Movie {
    Table,
    Id,
}
