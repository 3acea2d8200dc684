//! Schedule entity, the recurring rule for session deadlines.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schedule")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Day of week (0=Sunday, 6=Saturday).
    pub weekday: i16,

    pub hour: i16,

    pub minute: i16,

    /// IANA timezone name.
    pub timezone: String,

    /// At most one row may be active (partial unique index).
    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
