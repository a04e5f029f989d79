//! Taxonomy entities: lesson, topic, subtopic
//!
//! Resolved or created by scoped name during classification: lessons are
//! unique by name, topics unique per (lesson, name), subtopics unique per
//! (topic, name).

pub mod lesson {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "lessons")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,

        #[sea_orm(column_type = "Text", unique)]
        pub name: String,

        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::topic::Entity")]
        Topics,
    }

    impl Related<super::topic::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Topics.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod topic {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "topics")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,

        pub lesson_id: Uuid,

        #[sea_orm(column_type = "Text")]
        pub name: String,

        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::lesson::Entity",
            from = "Column::LessonId",
            to = "super::lesson::Column::Id",
            on_delete = "Cascade"
        )]
        Lesson,

        #[sea_orm(has_many = "super::subtopic::Entity")]
        Subtopics,
    }

    impl Related<super::lesson::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Lesson.def()
        }
    }

    impl Related<super::subtopic::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Subtopics.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod subtopic {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "subtopics")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,

        pub topic_id: Uuid,

        #[sea_orm(column_type = "Text")]
        pub name: String,

        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::topic::Entity",
            from = "Column::TopicId",
            to = "super::topic::Column::Id",
            on_delete = "Cascade"
        )]
        Topic,
    }

    impl Related<super::topic::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Topic.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
