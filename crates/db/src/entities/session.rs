//! Session entity, a scheduled group viewing.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Session lifecycle status. `Finished` and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum SessionStatus {
    #[sea_orm(string_value = "ONGOING")]
    Ongoing,
    #[sea_orm(string_value = "FINISHED")]
    Finished,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl SessionStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "session")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Planned end of the session (unix time).
    pub finished_at: i64,

    /// At most one row may be `Ongoing` (partial unique index).
    #[sea_orm(indexed)]
    pub status: SessionStatus,

    pub description: Option<String>,

    pub created_by: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::session_movie::Entity")]
    SessionMovie,

    #[sea_orm(has_many = "super::voting::Entity")]
    Voting,
}

impl Related<super::session_movie::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SessionMovie.def()
    }
}

impl Related<super::voting::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Voting.def()
    }
}

impl Related<super::movie::Entity> for Entity {
    fn to() -> RelationDef {
        super::session_movie::Relation::Movie.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::session_movie::Relation::Session.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
