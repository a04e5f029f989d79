//! Upload batch entity
//!
//! Root unit of an upload session. `status` is only ever advanced by the
//! recalculation walk or by explicit cancel; no caller asserts it directly.

use crate::transitions::BatchStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub status: BatchStatus,

    /// Admin-supplied classification hint carried onto every block of the
    /// batch. A batch without one cannot be classified.
    #[sea_orm(column_type = "Text", nullable)]
    pub content_type: Option<String>,

    /// Optional vision-provider override forwarded to the collaborator.
    #[sea_orm(column_type = "Text", nullable)]
    pub vision_provider: Option<String>,

    pub created_by: Uuid,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::page::Entity")]
    Pages,

    #[sea_orm(has_many = "super::approved_content::Entity")]
    ApprovedContents,
}

impl Related<super::page::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pages.def()
    }
}

impl Related<super::approved_content::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApprovedContents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
