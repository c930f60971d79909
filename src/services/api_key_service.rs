use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entities::{api_key_entity as api_keys, package_entity as packages};
use crate::error::{AppError, AppResult};
use crate::models::{Package, UsageResponse};
use crate::utils::{generate_api_key, start_of_next_day};

#[derive(Clone)]
pub struct ApiKeyService {
    pool: DatabaseConnection,
}

impl ApiKeyService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// 为用户签发新的 API key，计量窗口从当前时刻开始
    pub async fn issue(&self, user_id: i32, package_id: i32) -> AppResult<api_keys::Model> {
        issue_api_key(&self.pool, user_id, package_id, Utc::now()).await
    }

    /// 切换套餐：计数清零，窗口重新开始
    pub async fn rebind_package(&self, user_id: i32, package_id: i32) -> AppResult<api_keys::Model> {
        rebind_api_key(&self.pool, user_id, package_id, Utc::now()).await
    }

    /// 当前用量；窗口已过期时按 0 展示（实际清零发生在下一次计量请求）
    pub async fn usage_for_user(&self, user_id: i32) -> AppResult<UsageResponse> {
        let key = api_keys::Entity::find()
            .filter(api_keys::Column::UserId.eq(user_id))
            .order_by_desc(api_keys::Column::Id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("No API key issued for this user".to_string()))?;

        let package: Package = packages::Entity::find_by_id(key.package_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("Package {} missing", key.package_id)))?
            .into();

        let now = Utc::now();
        let (audio_usage, text_usage, last_reset, next_reset) = if now >= key.next_reset {
            (0, 0, key.next_reset, start_of_next_day(now))
        } else {
            (key.audio_usage, key.text_usage, key.last_reset, key.next_reset)
        };

        Ok(UsageResponse {
            api_key: key.key,
            audio_remaining: package.audio_soap_notes.remaining(audio_usage),
            text_remaining: package.text_soap_notes.remaining(text_usage),
            package: package.into(),
            audio_usage,
            text_usage,
            last_reset,
            next_reset,
        })
    }
}

/// 在给定连接（或事务）上签发 key，注册流程在同一事务中调用
pub async fn issue_api_key<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    package_id: i32,
    now: DateTime<Utc>,
) -> AppResult<api_keys::Model> {
    let model = api_keys::ActiveModel {
        user_id: Set(user_id),
        package_id: Set(package_id),
        key: Set(generate_api_key()),
        audio_usage: Set(0),
        text_usage: Set(0),
        last_reset: Set(now),
        next_reset: Set(start_of_next_day(now)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    log::info!("Issued API key {} for user {user_id} (package {package_id})", model.id);
    Ok(model)
}

pub async fn rebind_api_key<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    package_id: i32,
    now: DateTime<Utc>,
) -> AppResult<api_keys::Model> {
    let result = api_keys::Entity::update_many()
        .col_expr(api_keys::Column::PackageId, Expr::value(package_id))
        .col_expr(api_keys::Column::AudioUsage, Expr::value(0))
        .col_expr(api_keys::Column::TextUsage, Expr::value(0))
        .col_expr(api_keys::Column::LastReset, Expr::value(now))
        .col_expr(api_keys::Column::NextReset, Expr::value(start_of_next_day(now)))
        .col_expr(api_keys::Column::UpdatedAt, Expr::value(now))
        .filter(api_keys::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound("No API key issued for this user".to_string()));
    }

    log::info!("Rebound API key of user {user_id} to package {package_id}");

    api_keys::Entity::find()
        .filter(api_keys::Column::UserId.eq(user_id))
        .order_by_desc(api_keys::Column::Id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("No API key issued for this user".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{create_test_user, setup_test_db};
    use crate::entities::PackageName;
    use crate::models::FeatureLimit;
    use crate::services::PackageService;

    #[tokio::test]
    async fn test_issue_and_usage() {
        let (pool, _temp_file) = setup_test_db().await;
        let free = PackageService::new(pool.clone())
            .find_by_name(PackageName::Free)
            .await
            .unwrap();
        let user = create_test_user(&pool, "usage@example.com").await;
        let service = ApiKeyService::new(pool.clone());

        let key = service.issue(user.id, free.id).await.unwrap();
        assert_eq!(key.key.len(), 64);
        assert!(key.next_reset > key.last_reset);

        let usage = service.usage_for_user(user.id).await.unwrap();
        assert_eq!(usage.api_key, key.key);
        assert_eq!(usage.audio_remaining, FeatureLimit::Limited(3));
        assert_eq!(usage.text_remaining, FeatureLimit::Limited(5));
    }

    #[tokio::test]
    async fn test_rebind_resets_counters() {
        let (pool, _temp_file) = setup_test_db().await;
        let packages = PackageService::new(pool.clone());
        let free = packages.find_by_name(PackageName::Free).await.unwrap();
        let premium = packages.find_by_name(PackageName::Premium).await.unwrap();
        let user = create_test_user(&pool, "rebind@example.com").await;
        let service = ApiKeyService::new(pool.clone());

        let key = service.issue(user.id, free.id).await.unwrap();
        let mut active: api_keys::ActiveModel = key.clone().into();
        active.audio_usage = Set(3);
        active.text_usage = Set(2);
        active.update(&pool).await.unwrap();

        let rebound = service.rebind_package(user.id, premium.id).await.unwrap();
        assert_eq!(rebound.key, key.key);
        assert_eq!(rebound.package_id, premium.id);
        assert_eq!(rebound.audio_usage, 0);
        assert_eq!(rebound.text_usage, 0);

        let usage = service.usage_for_user(user.id).await.unwrap();
        assert_eq!(usage.text_remaining, FeatureLimit::Unlimited);

        assert!(matches!(
            service.rebind_package(user.id + 100, premium.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
