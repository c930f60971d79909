use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum SoapNotes {
    Table,
    Id,
    UserId,
    NoteType,
    InputType,
    SourceText,
    PatientName,
    TherapistName,
    SessionDate,
    SessionTime,
    Icd10,
    Cpt,
    Subjective,
    Objective,
    Assessment,
    Plan,
    AudioFileName,
    AudioMimeType,
    AudioSizeBytes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
    UserId,
    PackageId,
    StripePaymentId,
    AmountCents,
    Currency,
    Status,
    Plan,
    CouponCode,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Packages {
    Table,
    Id,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SoapNotes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SoapNotes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SoapNotes::UserId).integer().not_null())
                    .col(ColumnDef::new(SoapNotes::NoteType).string_len(64).not_null())
                    .col(ColumnDef::new(SoapNotes::InputType).string_len(16).not_null())
                    .col(ColumnDef::new(SoapNotes::SourceText).text().not_null())
                    .col(ColumnDef::new(SoapNotes::PatientName).string_len(255).null())
                    .col(ColumnDef::new(SoapNotes::TherapistName).string_len(255).null())
                    .col(ColumnDef::new(SoapNotes::SessionDate).date().not_null())
                    .col(ColumnDef::new(SoapNotes::SessionTime).string_len(16).not_null())
                    .col(ColumnDef::new(SoapNotes::Icd10).string_len(64).not_null())
                    .col(ColumnDef::new(SoapNotes::Cpt).string_len(64).not_null())
                    .col(ColumnDef::new(SoapNotes::Subjective).text().not_null())
                    .col(ColumnDef::new(SoapNotes::Objective).text().not_null())
                    .col(ColumnDef::new(SoapNotes::Assessment).text().not_null())
                    .col(ColumnDef::new(SoapNotes::Plan).text().not_null())
                    .col(ColumnDef::new(SoapNotes::AudioFileName).string_len(255).null())
                    .col(ColumnDef::new(SoapNotes::AudioMimeType).string_len(128).null())
                    .col(ColumnDef::new(SoapNotes::AudioSizeBytes).big_integer().null())
                    .col(
                        ColumnDef::new(SoapNotes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SoapNotes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_soap_notes_user")
                            .from(SoapNotes::Table, SoapNotes::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_soap_notes_user")
                    .table(SoapNotes::Table)
                    .col(SoapNotes::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Payments::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Payments::UserId).integer().not_null())
                    .col(ColumnDef::new(Payments::PackageId).integer().not_null())
                    .col(
                        ColumnDef::new(Payments::StripePaymentId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Payments::AmountCents).big_integer().not_null())
                    .col(
                        ColumnDef::new(Payments::Currency)
                            .string_len(8)
                            .not_null()
                            .default("usd"),
                    )
                    .col(
                        ColumnDef::new(Payments::Status)
                            .string_len(32)
                            .not_null()
                            .default("requires_payment_method"),
                    )
                    .col(ColumnDef::new(Payments::Plan).string_len(16).not_null())
                    .col(ColumnDef::new(Payments::CouponCode).string_len(64).null())
                    .col(
                        ColumnDef::new(Payments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Payments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_user")
                            .from(Payments::Table, Payments::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_package")
                            .from(Payments::Table, Payments::PackageId)
                            .to(Packages::Table, Packages::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_payments_stripe_payment_id")
                    .table(Payments::Table)
                    .col(Payments::StripePaymentId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().if_exists().table(Payments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(SoapNotes::Table).to_owned())
            .await?;
        Ok(())
    }
}
