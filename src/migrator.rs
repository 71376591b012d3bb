use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_catalog_tables::Migration),
            Box::new(m20240301_000002_create_payment_tables::Migration),
            Box::new(m20240301_000003_create_enrollments_table::Migration),
            Box::new(m20240301_000004_create_webhook_notifications_table::Migration),
            Box::new(m20240301_000005_create_moderation_audit_log_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Courses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Courses::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Courses::OwnerId).uuid().not_null())
                        .col(ColumnDef::new(Courses::Title).string().not_null())
                        .col(
                            ColumnDef::new(Courses::Price)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Courses::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Courses::ReviewedBy).uuid().null())
                        .col(
                            ColumnDef::new(Courses::ReviewedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Courses::ReviewComments).text().null())
                        .col(
                            ColumnDef::new(Courses::PublishedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Courses::ArchivedFromStatus)
                                .string_len(20)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Courses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Courses::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_courses_status")
                        .table(Courses::Table)
                        .col(Courses::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_courses_owner_id")
                        .table(Courses::Table)
                        .col(Courses::OwnerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InstructorProfiles::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InstructorProfiles::UserId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InstructorProfiles::DisplayName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InstructorProfiles::InstructorStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InstructorProfiles::RejectionReason)
                                .text()
                                .null(),
                        )
                        .col(ColumnDef::new(InstructorProfiles::ReviewedBy).uuid().null())
                        .col(
                            ColumnDef::new(InstructorProfiles::ReviewedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(InstructorProfiles::ReviewNotes).text().null())
                        .col(
                            ColumnDef::new(InstructorProfiles::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InstructorProfiles::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InstructorProfiles::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Courses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Courses {
        Table,
        Id,
        OwnerId,
        Title,
        Price,
        Status,
        ReviewedBy,
        ReviewedAt,
        ReviewComments,
        PublishedAt,
        ArchivedFromStatus,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InstructorProfiles {
        Table,
        UserId,
        DisplayName,
        InstructorStatus,
        RejectionReason,
        ReviewedBy,
        ReviewedAt,
        ReviewNotes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_payment_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_payment_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentIntents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentIntents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::Total)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::CourseIds).json().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::Metadata).json().null())
                        .col(
                            ColumnDef::new(PaymentIntents::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_intents_user_id")
                        .table(PaymentIntents::Table)
                        .col(PaymentIntents::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::PaymentIntentId).uuid().not_null())
                        .col(ColumnDef::new(Payments::UserId).uuid().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(Payments::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Payments::GatewayToken).string().not_null())
                        .col(ColumnDef::new(Payments::PaymentMethodId).string().not_null())
                        .col(ColumnDef::new(Payments::Installments).integer().not_null())
                        .col(ColumnDef::new(Payments::IdempotencyKey).string().not_null())
                        .col(ColumnDef::new(Payments::GatewayPaymentId).string().null())
                        .col(ColumnDef::new(Payments::GatewayStatus).string().null())
                        .col(ColumnDef::new(Payments::GatewayStatusDetail).string().null())
                        .col(ColumnDef::new(Payments::GatewayResponse).json().null())
                        .col(ColumnDef::new(Payments::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Sole guard against double charging under concurrent duplicate submissions
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_idempotency_key")
                        .table(Payments::Table)
                        .col(Payments::IdempotencyKey)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_gateway_payment_id")
                        .table(Payments::Table)
                        .col(Payments::GatewayPaymentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_payment_intent_id")
                        .table(Payments::Table)
                        .col(Payments::PaymentIntentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PaymentIntents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentIntents {
        Table,
        Id,
        UserId,
        Total,
        Currency,
        CourseIds,
        Status,
        Metadata,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        PaymentIntentId,
        UserId,
        Amount,
        Currency,
        GatewayToken,
        PaymentMethodId,
        Installments,
        IdempotencyKey,
        GatewayPaymentId,
        GatewayStatus,
        GatewayStatusDetail,
        GatewayResponse,
        Status,
        CreatedAt,
        UpdatedAt,
        ProcessedAt,
    }
}

mod m20240301_000003_create_enrollments_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_enrollments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Enrollments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Enrollments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Enrollments::UserId).uuid().not_null())
                        .col(ColumnDef::new(Enrollments::CourseId).uuid().not_null())
                        .col(ColumnDef::new(Enrollments::PaymentId).uuid().null())
                        .col(ColumnDef::new(Enrollments::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Enrollments::ProgressPercentage)
                                .decimal_len(5, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Enrollments::EnrolledAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Enrollments::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Enrollments::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Enrollments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_enrollments_user_course")
                        .table(Enrollments::Table)
                        .col(Enrollments::UserId)
                        .col(Enrollments::CourseId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_enrollments_payment_id")
                        .table(Enrollments::Table)
                        .col(Enrollments::PaymentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Enrollments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Enrollments {
        Table,
        Id,
        UserId,
        CourseId,
        PaymentId,
        Status,
        ProgressPercentage,
        EnrolledAt,
        ExpiresAt,
        CompletedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_webhook_notifications_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_webhook_notifications_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WebhookNotifications::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WebhookNotifications::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WebhookNotifications::NotificationId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(WebhookNotifications::Topic).string().not_null())
                        .col(
                            ColumnDef::new(WebhookNotifications::GatewayPaymentId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookNotifications::RequestId).string().null())
                        .col(ColumnDef::new(WebhookNotifications::Payload).json().not_null())
                        .col(
                            ColumnDef::new(WebhookNotifications::Processed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(WebhookNotifications::Error).text().null())
                        .col(
                            ColumnDef::new(WebhookNotifications::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WebhookNotifications::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_webhook_notifications_gateway_payment_id")
                        .table(WebhookNotifications::Table)
                        .col(WebhookNotifications::GatewayPaymentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WebhookNotifications::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WebhookNotifications {
        Table,
        Id,
        NotificationId,
        Topic,
        GatewayPaymentId,
        RequestId,
        Payload,
        Processed,
        Error,
        ReceivedAt,
        ProcessedAt,
    }
}

mod m20240301_000005_create_moderation_audit_log_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_moderation_audit_log_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ModerationAuditLog::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ModerationAuditLog::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ModerationAuditLog::EntityType)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ModerationAuditLog::EntityId).uuid().not_null())
                        .col(
                            ColumnDef::new(ModerationAuditLog::FromStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ModerationAuditLog::ToStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ModerationAuditLog::Action).string_len(32).not_null())
                        .col(ColumnDef::new(ModerationAuditLog::ActorId).uuid().not_null())
                        .col(ColumnDef::new(ModerationAuditLog::Notes).text().null())
                        .col(
                            ColumnDef::new(ModerationAuditLog::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_moderation_audit_log_entity")
                        .table(ModerationAuditLog::Table)
                        .col(ModerationAuditLog::EntityType)
                        .col(ModerationAuditLog::EntityId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ModerationAuditLog::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ModerationAuditLog {
        Table,
        Id,
        EntityType,
        EntityId,
        FromStatus,
        ToStatus,
        Action,
        ActorId,
        Notes,
        CreatedAt,
    }
}
