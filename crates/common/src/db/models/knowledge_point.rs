//! Knowledge point entity
//!
//! Structured output of the extraction collaborator. Exactly one of
//! `approved_content_id` / `exam_question_id` is set, matching the job that
//! produced the row.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "knowledge_points")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub approved_content_id: Option<Uuid>,

    pub exam_question_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub category: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::approved_content::Entity",
        from = "Column::ApprovedContentId",
        to = "super::approved_content::Column::Id",
        on_delete = "Cascade"
    )]
    ApprovedContent,

    #[sea_orm(
        belongs_to = "super::exam_question::Entity",
        from = "Column::ExamQuestionId",
        to = "super::exam_question::Column::Id",
        on_delete = "Cascade"
    )]
    ExamQuestion,
}

impl Related<super::approved_content::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApprovedContent.def()
    }
}

impl Related<super::exam_question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExamQuestion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
