use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// 已签发的 API key 及其当前计量窗口
/// - audio_usage / text_usage: 当前窗口内已用次数，只在 now >= next_reset 时归零
/// - next_reset: 窗口结束时间（次日 00:00 UTC）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub package_id: i32,
    #[sea_orm(unique)]
    pub key: String,
    pub audio_usage: i32,
    pub text_usage: i32,
    pub last_reset: DateTime<Utc>,
    pub next_reset: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
