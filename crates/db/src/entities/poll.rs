//! Poll entity, the chat-rendered side of a voting.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::voting::VotingKind;

/// Whether the poll still accepts answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum PollStatus {
    #[sea_orm(string_value = "OPENED")]
    Opened,
    #[sea_orm(string_value = "CLOSED")]
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "poll")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Poll id assigned by the chat platform.
    #[sea_orm(unique)]
    pub external_poll_id: String,

    /// Chat the poll message was posted to.
    pub chat_id: i64,

    pub message_id: i32,

    #[sea_orm(unique)]
    pub voting_id: i32,

    pub kind: VotingKind,

    pub status: PollStatus,

    pub movie_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::voting::Entity",
        from = "Column::VotingId",
        to = "super::voting::Column::Id",
        on_delete = "Cascade"
    )]
    Voting,

    #[sea_orm(has_many = "super::poll_option::Entity")]
    PollOption,
}

impl Related<super::voting::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Voting.def()
    }
}

impl Related<super::poll_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollOption.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
