//! Approved content entity
//!
//! The accepted, extraction-eligible snapshot of an approved block. At most
//! one row exists per block (unique `block_id`), created lazily on first
//! approval. If the block's approved text changes after extraction already
//! queued/started/completed, `extraction_status` is reset so stale output is
//! never silently kept.

use crate::transitions::ExtractionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::block::BlockType;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "approved_contents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub block_id: Uuid,

    /// Denormalized for batch-level aggregate queries.
    pub batch_id: Uuid,

    /// Content snapshot taken at approval time.
    #[sea_orm(column_type = "Text")]
    pub content: String,

    pub block_type: BlockType,

    pub extraction_status: ExtractionStatus,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub extracted_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::block::Entity",
        from = "Column::BlockId",
        to = "super::block::Column::Id",
        on_delete = "Cascade"
    )]
    Block,

    #[sea_orm(
        belongs_to = "super::batch::Entity",
        from = "Column::BatchId",
        to = "super::batch::Column::Id"
    )]
    Batch,
}

impl Related<super::block::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Block.def()
    }
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
