//! SeaORM entity models
//!
//! Database entities for the Chalkline content pipeline

mod approved_content;
mod batch;
mod block;
mod exam_question;
mod knowledge_point;
mod page;
mod taxonomy;

pub use batch::{
    ActiveModel as BatchActiveModel, Column as BatchColumn, Entity as BatchEntity, Model as Batch,
};

pub use page::{
    ActiveModel as PageActiveModel, Column as PageColumn, Entity as PageEntity, Model as Page,
};

pub use block::{
    ActiveModel as BlockActiveModel, BlockType, Column as BlockColumn, Entity as BlockEntity,
    Model as Block,
};

pub use approved_content::{
    ActiveModel as ApprovedContentActiveModel, Column as ApprovedContentColumn,
    Entity as ApprovedContentEntity, Model as ApprovedContent,
};

pub use exam_question::{
    ActiveModel as ExamQuestionActiveModel, Column as ExamQuestionColumn,
    Entity as ExamQuestionEntity, Model as ExamQuestion,
};

pub use knowledge_point::{
    ActiveModel as KnowledgePointActiveModel, Column as KnowledgePointColumn,
    Entity as KnowledgePointEntity, Model as KnowledgePoint,
};

pub use taxonomy::lesson::{
    ActiveModel as LessonActiveModel, Column as LessonColumn, Entity as LessonEntity,
    Model as Lesson,
};

pub use taxonomy::topic::{
    ActiveModel as TopicActiveModel, Column as TopicColumn, Entity as TopicEntity, Model as Topic,
};

pub use taxonomy::subtopic::{
    ActiveModel as SubtopicActiveModel, Column as SubtopicColumn, Entity as SubtopicEntity,
    Model as Subtopic,
};
