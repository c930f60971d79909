pub use sea_orm_migration::prelude::*;

mod m20250301_000001_initial;
mod m20250301_000002_add_quota_tables;
mod m20250301_000003_add_soap_notes_and_payments;
mod m20250301_000004_add_password_reset_otp;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_initial::Migration),
            Box::new(m20250301_000002_add_quota_tables::Migration),
            Box::new(m20250301_000003_add_soap_notes_and_payments::Migration),
            Box::new(m20250301_000004_add_password_reset_otp::Migration),
        ]
    }
}
