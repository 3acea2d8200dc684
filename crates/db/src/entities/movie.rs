//! Movie entity, the local projection of a catalog movie.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether the club has watched a movie yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum MovieStatus {
    #[sea_orm(string_value = "SUGGESTED")]
    Suggested,
    #[sea_orm(string_value = "WATCHED")]
    Watched,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "movie")]
pub struct Model {
    /// Catalog identifier.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub title: String,

    pub description: Option<String>,

    pub year: Option<i32>,

    /// Catalog page link.
    pub link: Option<String>,

    /// Club rating, the mean of the last closed rating voting.
    pub rating: Option<f64>,

    pub status: MovieStatus,

    /// How many sessions this movie was shown in.
    pub watch_count: i32,

    /// Unix time of the last session that showed this movie.
    pub finished_at: Option<i64>,

    /// Chat user who suggested the movie.
    pub suggested_by: Option<i64>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::session_movie::Entity")]
    SessionMovie,
}

impl Related<super::session_movie::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SessionMovie.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        super::session_movie::Relation::Session.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::session_movie::Relation::Movie.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
