use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowDefinitions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowDefinitions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowDefinitions::Name).string().not_null())
                    .col(ColumnDef::new(WorkflowDefinitions::Description).text().null())
                    .col(ColumnDef::new(WorkflowDefinitions::OrganizationId).string().null())
                    .col(ColumnDef::new(WorkflowDefinitions::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(WorkflowDefinitions::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkflowSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowSteps::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowSteps::WorkflowId).big_integer().not_null())
                    .col(ColumnDef::new(WorkflowSteps::StepOrder).integer().not_null())
                    .col(ColumnDef::new(WorkflowSteps::Name).string().not_null())
                    .col(ColumnDef::new(WorkflowSteps::Approvers).text().not_null())
                    .col(ColumnDef::new(WorkflowSteps::ApprovalType).string().not_null())
                    .col(ColumnDef::new(WorkflowSteps::RejectionAction).string().not_null())
                    .col(ColumnDef::new(WorkflowSteps::EscalationApprovers).text().not_null())
                    .col(ColumnDef::new(WorkflowSteps::EscalationRoles).text().not_null())
                    .col(ColumnDef::new(WorkflowSteps::TimeoutHours).integer().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_steps_unique")
                    .table(WorkflowSteps::Table)
                    .col(WorkflowSteps::WorkflowId)
                    .col(WorkflowSteps::StepOrder)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkflowInstances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowInstances::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowInstances::WorkflowId).big_integer().not_null())
                    .col(ColumnDef::new(WorkflowInstances::EntityType).string().not_null())
                    .col(ColumnDef::new(WorkflowInstances::EntityId).string().not_null())
                    .col(ColumnDef::new(WorkflowInstances::CurrentStep).integer().not_null())
                    .col(
                        ColumnDef::new(WorkflowInstances::Round)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WorkflowInstances::Status).string().not_null())
                    .col(ColumnDef::new(WorkflowInstances::Context).text().not_null())
                    .col(
                        ColumnDef::new(WorkflowInstances::Revision)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WorkflowInstances::StartedBy).string().not_null())
                    .col(ColumnDef::new(WorkflowInstances::StartedAt).timestamp().not_null())
                    .col(ColumnDef::new(WorkflowInstances::CompletedAt).timestamp().null())
                    .col(ColumnDef::new(WorkflowInstances::CancelledAt).timestamp().null())
                    .col(ColumnDef::new(WorkflowInstances::CancellationReason).text().null())
                    .col(
                        ColumnDef::new(WorkflowInstances::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowInstances::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_instances_entity")
                    .table(WorkflowInstances::Table)
                    .col(WorkflowInstances::EntityType)
                    .col(WorkflowInstances::EntityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_instances_status")
                    .table(WorkflowInstances::Table)
                    .col(WorkflowInstances::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkflowApprovals::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowApprovals::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkflowApprovals::WorkflowInstanceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowApprovals::StepNumber).integer().not_null())
                    .col(ColumnDef::new(WorkflowApprovals::StepName).string().not_null())
                    .col(
                        ColumnDef::new(WorkflowApprovals::Round)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WorkflowApprovals::ApproverId).string().not_null())
                    .col(ColumnDef::new(WorkflowApprovals::Status).string().not_null())
                    .col(ColumnDef::new(WorkflowApprovals::Comments).text().null())
                    .col(ColumnDef::new(WorkflowApprovals::DecidedAt).timestamp().null())
                    .col(ColumnDef::new(WorkflowApprovals::DelegatedTo).string().null())
                    .col(ColumnDef::new(WorkflowApprovals::ExpiresAt).timestamp().null())
                    .col(
                        ColumnDef::new(WorkflowApprovals::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowApprovals::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_approvals_instance_step")
                    .table(WorkflowApprovals::Table)
                    .col(WorkflowApprovals::WorkflowInstanceId)
                    .col(WorkflowApprovals::StepNumber)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_approvals_approver_status")
                    .table(WorkflowApprovals::Table)
                    .col(WorkflowApprovals::ApproverId)
                    .col(WorkflowApprovals::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkflowApprovals::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowInstances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowDefinitions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowDefinitions {
    Table,
    Id,
    Name,
    Description,
    OrganizationId,
    CreatedBy,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkflowSteps {
    Table,
    Id,
    WorkflowId,
    StepOrder,
    Name,
    Approvers,
    ApprovalType,
    RejectionAction,
    EscalationApprovers,
    EscalationRoles,
    TimeoutHours,
}

#[derive(DeriveIden)]
enum WorkflowInstances {
    Table,
    Id,
    WorkflowId,
    EntityType,
    EntityId,
    CurrentStep,
    Round,
    Status,
    Context,
    Revision,
    StartedBy,
    StartedAt,
    CompletedAt,
    CancelledAt,
    CancellationReason,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkflowApprovals {
    Table,
    Id,
    WorkflowInstanceId,
    StepNumber,
    StepName,
    Round,
    ApproverId,
    Status,
    Comments,
    DecidedAt,
    DelegatedTo,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
