//! SeaORM entities for the approval workflow tables
//!
//! List-valued columns (approvers, roles) and the instance context are JSON
//! text so the same schema runs on Postgres and SQLite.

pub mod workflow_definitions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "workflow_definitions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub name: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub description: Option<String>,
        pub organization_id: Option<String>,
        pub created_by: String,
        pub is_active: bool,
        pub created_at: chrono::NaiveDateTime,
        pub updated_at: chrono::NaiveDateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod workflow_steps {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "workflow_steps")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub workflow_id: i64,
        pub step_order: i32,
        pub name: String,
        #[sea_orm(column_type = "Text")]
        pub approvers: String,
        pub approval_type: String,
        pub rejection_action: String,
        #[sea_orm(column_type = "Text")]
        pub escalation_approvers: String,
        #[sea_orm(column_type = "Text")]
        pub escalation_roles: String,
        pub timeout_hours: Option<i32>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod workflow_instances {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "workflow_instances")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub workflow_id: i64,
        pub entity_type: String,
        pub entity_id: String,
        pub current_step: i32,
        pub round: i32,
        pub status: String,
        #[sea_orm(column_type = "Text")]
        pub context: String,
        pub revision: i32,
        pub started_by: String,
        pub started_at: chrono::NaiveDateTime,
        pub completed_at: Option<chrono::NaiveDateTime>,
        pub cancelled_at: Option<chrono::NaiveDateTime>,
        #[sea_orm(column_type = "Text", nullable)]
        pub cancellation_reason: Option<String>,
        pub created_at: chrono::NaiveDateTime,
        pub updated_at: chrono::NaiveDateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod workflow_approvals {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "workflow_approvals")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub workflow_instance_id: i64,
        pub step_number: i32,
        pub step_name: String,
        pub round: i32,
        pub approver_id: String,
        pub status: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub comments: Option<String>,
        pub decided_at: Option<chrono::NaiveDateTime>,
        pub delegated_to: Option<String>,
        pub expires_at: Option<chrono::NaiveDateTime>,
        pub created_at: chrono::NaiveDateTime,
        pub updated_at: chrono::NaiveDateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
