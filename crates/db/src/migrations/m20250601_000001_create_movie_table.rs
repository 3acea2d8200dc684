//! Create movie table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Movie::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Movie::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Movie::Title).string().not_null())
                    .col(ColumnDef::new(Movie::Description).text().null())
                    .col(ColumnDef::new(Movie::Year).integer().null())
                    .col(ColumnDef::new(Movie::Link).string().null())
                    .col(ColumnDef::new(Movie::Rating).double().null())
                    .col(
                        ColumnDef::new(Movie::Status)
                            .string()
                            .not_null()
                            .default("SUGGESTED"),
                    )
                    .col(
                        ColumnDef::new(Movie::WatchCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Movie::FinishedAt).big_integer().null())
                    .col(ColumnDef::new(Movie::SuggestedBy).big_integer().null())
                    .col(
                        ColumnDef::new(Movie::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movie_status")
                    .table(Movie::Table)
                    .col(Movie::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Movie::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Movie {
    Table,
    Id,
    Title,
    Description,
    Year,
    Link,
    Rating,
    Status,
    WatchCount,
    FinishedAt,
    SuggestedBy,
    CreatedAt,
}
