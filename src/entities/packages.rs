use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum PackageName {
    #[sea_orm(string_value = "Premium")]
    Premium,
    #[sea_orm(string_value = "Standard")]
    Standard,
    #[sea_orm(string_value = "Basic")]
    Basic,
    #[sea_orm(string_value = "Free")]
    Free,
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageName::Premium => write!(f, "Premium"),
            PackageName::Standard => write!(f, "Standard"),
            PackageName::Basic => write!(f, "Basic"),
            PackageName::Free => write!(f, "Free"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    #[sea_orm(string_value = "monthly")]
    Monthly,
    #[sea_orm(string_value = "free")]
    Free,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    #[sea_orm(string_value = "minutes")]
    Minutes,
    #[sea_orm(string_value = "hours")]
    Hours,
}

/// 套餐（权益模板）
/// - audio_soap_notes / text_soap_notes: 每个窗口的次数上限，NULL 表示不限量
/// - audio_file_length_value + unit: 单个音频的时长上限
/// - price_cents: 月价(美分)
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "packages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: PackageName,
    pub price_cents: i64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub audio_soap_notes: Option<i32>,
    pub text_soap_notes: Option<i32>,
    pub audio_file_length_value: i32,
    pub audio_file_length_unit: DurationUnit,
    pub yearly_discount: i32,
    pub trial_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
