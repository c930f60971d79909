use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::{FeatureLimit, Package, PackageResponse};
use crate::entities::InputType;

/// 被计量的请求类型
pub type RequestType = InputType;

/// 一次放行后的配额快照，中间件据此写 X-RateLimit-* 响应头
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub audio_remaining: FeatureLimit,
    pub text_remaining: FeatureLimit,
    /// 单个音频允许的分钟数
    pub audio_duration_minutes: u32,
    pub next_reset: DateTime<Utc>,
    /// 仅免费套餐
    pub ip_audio_remaining: Option<u32>,
    pub ip_text_remaining: Option<u32>,
}

/// 通过限流后放入 request extensions，供下游 handler 使用
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    pub api_key_id: i32,
    pub user_id: i32,
    pub package: Package,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UsageResponse {
    pub api_key: String,
    pub package: PackageResponse,
    pub audio_usage: i32,
    pub text_usage: i32,
    #[schema(value_type = Object, example = 17)]
    pub audio_remaining: FeatureLimit,
    #[schema(value_type = Object, example = "unlimited")]
    pub text_remaining: FeatureLimit,
    pub last_reset: DateTime<Utc>,
    pub next_reset: DateTime<Utc>,
}
