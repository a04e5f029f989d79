//! Block entity
//!
//! One parsed content unit extracted from a page, subject to admin review.
//! `content_type` is the admin-supplied hint copied from the batch; the AI
//! never chooses it. Soft delete is `deleted_at` plus the `Deleted` approval
//! status, and deleted blocks are excluded from every aggregate query.

use crate::transitions::{ApprovalStatus, ClassificationStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Structural kind of a parsed block, chosen by the flatten priority
/// TABLE > ALGORITHM > TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    #[sea_orm(string_value = "TEXT")]
    Text,
    #[sea_orm(string_value = "TABLE")]
    Table,
    #[sea_orm(string_value = "ALGORITHM")]
    Algorithm,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blocks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub page_id: Uuid,

    /// Denormalized for batch-level aggregate queries.
    pub batch_id: Uuid,

    /// Position within the page, assigned at creation.
    pub block_index: i32,

    /// Admin-supplied content type (from the batch hint or the manual-block
    /// request), never the AI's opinion.
    #[sea_orm(column_type = "Text")]
    pub content_type: String,

    pub block_type: BlockType,

    #[sea_orm(column_type = "Text")]
    pub raw_text: String,

    /// Structured table or algorithm payload when the block is not free text.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub structured_payload: Option<serde_json::Value>,

    // AI-resolved classification
    pub lesson_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub subtopic_id: Option<Uuid>,

    pub classification_status: ClassificationStatus,

    pub confidence: f64,

    pub approval_status: ApprovalStatus,

    pub is_edited: bool,

    #[sea_orm(column_type = "Text", nullable)]
    pub edited_text: Option<String>,

    pub approved_by: Option<Uuid>,

    pub approved_at: Option<DateTimeWithTimeZone>,

    /// Set for admin-authored manual blocks.
    pub created_by: Option<Uuid>,

    pub deleted_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// The text that review and extraction operate on: the edited text once
    /// an admin has touched the block, the raw parse otherwise.
    pub fn canonical_text(&self) -> &str {
        if self.is_edited {
            self.edited_text.as_deref().unwrap_or(&self.raw_text)
        } else {
            &self.raw_text
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::page::Entity",
        from = "Column::PageId",
        to = "super::page::Column::Id",
        on_delete = "Cascade"
    )]
    Page,

    #[sea_orm(has_many = "super::approved_content::Entity")]
    ApprovedContent,
}

impl Related<super::page::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Page.def()
    }
}

impl Related<super::approved_content::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApprovedContent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
