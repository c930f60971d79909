use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// 免费套餐按客户端 IP 的每日计数，自然日（UTC）变化时归零
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "ip_limits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub ip: String,
    pub audio_count: i32,
    pub text_count: i32,
    pub last_reset: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
