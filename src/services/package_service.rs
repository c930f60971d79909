use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entities::{PackageName, package_entity as packages};
use crate::error::{AppError, AppResult};
use crate::models::{Package, YearlyPriceResponse, default_catalog};

#[derive(Clone)]
pub struct PackageService {
    pool: DatabaseConnection,
}

impl PackageService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// 按 name upsert 默认套餐目录，启动时调用
    pub async fn seed_defaults(&self) -> AppResult<()> {
        let now = Utc::now();
        let catalog = default_catalog();
        let count = catalog.len();

        for seed in catalog {
            let model = packages::ActiveModel {
                name: Set(seed.name),
                price_cents: Set(seed.price_cents),
                currency: Set("USD".to_string()),
                billing_cycle: Set(seed.billing_cycle),
                audio_soap_notes: Set(seed.audio_soap_notes.to_column()),
                text_soap_notes: Set(seed.text_soap_notes.to_column()),
                audio_file_length_value: Set(seed.audio_file_length.value as i32),
                audio_file_length_unit: Set(seed.audio_file_length.unit),
                yearly_discount: Set(seed.yearly_discount),
                trial_days: Set(0),
                is_active: Set(true),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };

            packages::Entity::insert(model)
                .on_conflict(
                    OnConflict::column(packages::Column::Name)
                        .update_columns([
                            packages::Column::PriceCents,
                            packages::Column::BillingCycle,
                            packages::Column::AudioSoapNotes,
                            packages::Column::TextSoapNotes,
                            packages::Column::AudioFileLengthValue,
                            packages::Column::AudioFileLengthUnit,
                            packages::Column::YearlyDiscount,
                            packages::Column::IsActive,
                            packages::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&self.pool)
                .await?;
        }

        log::info!("Package catalog seeded ({count} packages)");
        Ok(())
    }

    /// 启用中的套餐，按价格从高到低
    pub async fn list_packages(&self) -> AppResult<Vec<Package>> {
        let list = packages::Entity::find()
            .filter(packages::Column::IsActive.eq(true))
            .order_by_desc(packages::Column::PriceCents)
            .all(&self.pool)
            .await?;
        Ok(list.into_iter().map(Into::into).collect())
    }

    pub async fn get_package(&self, id: i32) -> AppResult<Package> {
        packages::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| AppError::NotFound(format!("Package {id} not found")))
    }

    pub async fn find_by_name(&self, name: PackageName) -> AppResult<Package> {
        packages::Entity::find()
            .filter(packages::Column::Name.eq(name))
            .one(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| AppError::NotFound(format!("Package {name} not found")))
    }

    pub async fn yearly_price(&self, id: i32) -> AppResult<YearlyPriceResponse> {
        let package = self.get_package(id).await?;
        Ok(YearlyPriceResponse {
            package_id: package.id,
            monthly_price_cents: package.price_cents,
            yearly_price_cents: package.yearly_price_cents(),
            yearly_discount: package.yearly_discount,
        })
    }
}
