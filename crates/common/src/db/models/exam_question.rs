//! Exam question entity
//!
//! Independent of the batch lifecycle; `analysis_status` gates knowledge and
//! flashcard generation for exam-replica content.

use crate::transitions::AnalysisStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "exam_questions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub question_text: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub answer_text: Option<String>,

    pub analysis_status: AnalysisStatus,

    pub lesson_id: Option<Uuid>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub analyzed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
