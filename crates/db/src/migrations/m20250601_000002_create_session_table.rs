//! Create session and `session_movie` tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Session::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Session::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Session::FinishedAt).big_integer().not_null())
                    .col(ColumnDef::new(Session::Status).string().not_null())
                    .col(ColumnDef::new(Session::Description).text().null())
                    .col(ColumnDef::new(Session::CreatedBy).big_integer().not_null())
                    .col(
                        ColumnDef::new(Session::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Only one ongoing session at a time
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX IF NOT EXISTS "uq_session_single_ongoing" ON "session" ("status") WHERE "status" = 'ONGOING'"#,
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SessionMovie::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SessionMovie::SessionId).integer().not_null())
                    .col(
                        ColumnDef::new(SessionMovie::MovieId)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(SessionMovie::SessionId)
                            .col(SessionMovie::MovieId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(SessionMovie::Table, SessionMovie::SessionId)
                            .to(Session::Table, Session::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(SessionMovie::Table, SessionMovie::MovieId)
                            .to(Movie::Table, Movie::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_session_movie_movie_id")
                    .table(SessionMovie::Table)
                    .col(SessionMovie::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SessionMovie::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Session::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Session {
    Table,
    Id,
    FinishedAt,
    Status,
    Description,
    CreatedBy,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SessionMovie {
    Table,
    SessionId,
    MovieId,
}

#[derive(DeriveIden)]
enum Movie {
    Table,
    Id,
}
