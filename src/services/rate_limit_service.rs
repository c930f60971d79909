//! API key 校验与用量计量
//!
//! 一次计量请求的流程（全部在同一事务内）：
//! 1. 音频时长校验（只读，失败直接返回）
//! 2. key 的计量窗口到期则清零并推进到次日 00:00 UTC
//! 3. 免费套餐：IP 每日计数（不存在则创建，跨日清零，条件自增）
//! 4. 套餐次数：条件自增 `n = n + 1 WHERE n < limit`
//!
//! 任一步拒绝都会回滚事务，所以被拒绝的请求不会改动任何计数。

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::config::RateLimitConfig;
use crate::entities::{
    InputType, api_key_entity as api_keys, ip_limit_entity as ip_limits,
    package_entity as packages, user_entity as users,
};
use crate::error::{AppError, AppResult};
use crate::models::{FeatureLimit, Package, QuotaStatus, RequestType};
use crate::utils::{start_of_day, start_of_next_day};

/// 校验通过的 API key 及其所属用户、套餐
#[derive(Debug, Clone)]
pub struct ValidatedApiKey {
    pub api_key: api_keys::Model,
    pub user: users::Model,
    pub package: Package,
}

#[derive(Debug, Clone, Copy)]
struct IpRemaining {
    audio: u32,
    text: u32,
}

#[derive(Clone)]
pub struct RateLimitService {
    pool: DatabaseConnection,
    config: RateLimitConfig,
}

impl RateLimitService {
    pub fn new(pool: DatabaseConnection, config: RateLimitConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn validate_api_key(&self, key: &str) -> AppResult<ValidatedApiKey> {
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::InvalidCredential("API key is required".to_string()));
        }

        let api_key = api_keys::Entity::find()
            .filter(api_keys::Column::Key.eq(key))
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::InvalidCredential("Invalid API key".to_string()))?;

        let user = users::Entity::find_by_id(api_key.user_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::InvalidCredential("Invalid API key".to_string()))?;

        let package = packages::Entity::find_by_id(api_key.package_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(format!(
                    "Package {} bound to API key {} does not exist",
                    api_key.package_id, api_key.id
                ))
            })?;

        Ok(ValidatedApiKey {
            api_key,
            user,
            package: package.into(),
        })
    }

    pub async fn check_and_update_limits(
        &self,
        validated: &ValidatedApiKey,
        request_type: RequestType,
        client_ip: &str,
        audio_duration_minutes: Option<f64>,
    ) -> AppResult<QuotaStatus> {
        self.check_and_update_limits_at(
            validated,
            request_type,
            client_ip,
            audio_duration_minutes,
            Utc::now(),
        )
        .await
    }

    /// 与 `check_and_update_limits` 相同，但使用给定的当前时间
    pub async fn check_and_update_limits_at(
        &self,
        validated: &ValidatedApiKey,
        request_type: RequestType,
        client_ip: &str,
        audio_duration_minutes: Option<f64>,
        now: DateTime<Utc>,
    ) -> AppResult<QuotaStatus> {
        let package = &validated.package;

        if request_type == InputType::Audio {
            check_audio_duration(package, audio_duration_minutes)?;
        }

        let txn = self.pool.begin().await?;
        match self
            .consume_quota(&txn, validated, request_type, client_ip, now)
            .await
        {
            Ok(status) => {
                txn.commit().await?;
                log::debug!(
                    "Quota admitted: key={} type={request_type} ip={client_ip} audio_remaining={} text_remaining={}",
                    validated.api_key.id,
                    status.audio_remaining,
                    status.text_remaining
                );
                Ok(status)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    log::error!("Failed to roll back quota transaction: {rollback_err}");
                }
                if matches!(e, AppError::RateLimitExceeded { .. }) {
                    log::warn!(
                        "Quota rejected: key={} type={request_type} ip={client_ip}: {e}",
                        validated.api_key.id
                    );
                }
                Err(e)
            }
        }
    }

    async fn consume_quota(
        &self,
        txn: &DatabaseTransaction,
        validated: &ValidatedApiKey,
        request_type: RequestType,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> AppResult<QuotaStatus> {
        let key_id = validated.api_key.id;
        let package = &validated.package;

        // 窗口到期：清零并推进 next_reset
        api_keys::Entity::update_many()
            .col_expr(api_keys::Column::AudioUsage, Expr::value(0))
            .col_expr(api_keys::Column::TextUsage, Expr::value(0))
            .col_expr(api_keys::Column::LastReset, Expr::value(now))
            .col_expr(api_keys::Column::NextReset, Expr::value(start_of_next_day(now)))
            .col_expr(api_keys::Column::UpdatedAt, Expr::value(now))
            .filter(api_keys::Column::Id.eq(key_id))
            .filter(api_keys::Column::NextReset.lte(now))
            .exec(txn)
            .await?;

        let ip_remaining = if package.is_free() {
            Some(self.consume_ip_quota(txn, client_ip, request_type, now).await?)
        } else {
            None
        };

        let usage_column = match request_type {
            InputType::Audio => api_keys::Column::AudioUsage,
            InputType::Text => api_keys::Column::TextUsage,
        };
        let mut increment = api_keys::Entity::update_many()
            .col_expr(usage_column, Expr::col(usage_column).add(1))
            .col_expr(api_keys::Column::UpdatedAt, Expr::value(now))
            .filter(api_keys::Column::Id.eq(key_id));
        if let FeatureLimit::Limited(limit) = package.limit_for(request_type) {
            increment = increment.filter(usage_column.lt(limit as i32));
        }
        let result = increment.exec(txn).await?;

        let key = api_keys::Entity::find_by_id(key_id)
            .one(txn)
            .await?
            .ok_or_else(|| AppError::InvalidCredential("Invalid API key".to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::rate_limited(
                format!(
                    "Daily {request_type} SOAP note limit of {} reached for the {} package",
                    package.limit_for(request_type),
                    package.name
                ),
                key.next_reset,
            ));
        }

        Ok(QuotaStatus {
            audio_remaining: package.audio_soap_notes.remaining(key.audio_usage),
            text_remaining: package.text_soap_notes.remaining(key.text_usage),
            audio_duration_minutes: package.audio_file_length.allowed_minutes(),
            next_reset: key.next_reset,
            ip_audio_remaining: ip_remaining.map(|r| r.audio),
            ip_text_remaining: ip_remaining.map(|r| r.text),
        })
    }

    async fn consume_ip_quota(
        &self,
        txn: &DatabaseTransaction,
        client_ip: &str,
        request_type: RequestType,
        now: DateTime<Utc>,
    ) -> AppResult<IpRemaining> {
        let today = start_of_day(now);
        let tomorrow = start_of_next_day(now);

        ip_limits::Entity::insert(ip_limits::ActiveModel {
            ip: Set(client_ip.to_string()),
            audio_count: Set(0),
            text_count: Set(0),
            last_reset: Set(now),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::column(ip_limits::Column::Ip)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

        // last_reset 不在今天（UTC）则清零
        ip_limits::Entity::update_many()
            .col_expr(ip_limits::Column::AudioCount, Expr::value(0))
            .col_expr(ip_limits::Column::TextCount, Expr::value(0))
            .col_expr(ip_limits::Column::LastReset, Expr::value(now))
            .filter(ip_limits::Column::Ip.eq(client_ip))
            .filter(
                Condition::any()
                    .add(ip_limits::Column::LastReset.lt(today))
                    .add(ip_limits::Column::LastReset.gte(tomorrow)),
            )
            .exec(txn)
            .await?;

        let (count_column, ceiling) = match request_type {
            InputType::Audio => (ip_limits::Column::AudioCount, self.config.ip_daily_audio_limit),
            InputType::Text => (ip_limits::Column::TextCount, self.config.ip_daily_text_limit),
        };
        let result = ip_limits::Entity::update_many()
            .col_expr(count_column, Expr::col(count_column).add(1))
            .filter(ip_limits::Column::Ip.eq(client_ip))
            .filter(count_column.lt(ceiling.min(i32::MAX as u32) as i32))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::rate_limited(
                format!("Daily {request_type} limit of {ceiling} reached for this IP address"),
                tomorrow,
            ));
        }

        let row = ip_limits::Entity::find()
            .filter(ip_limits::Column::Ip.eq(client_ip))
            .one(txn)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("IP limit row for {client_ip} missing")))?;

        Ok(IpRemaining {
            audio: remaining(self.config.ip_daily_audio_limit, row.audio_count),
            text: remaining(self.config.ip_daily_text_limit, row.text_count),
        })
    }
}

fn remaining(ceiling: u32, used: i32) -> u32 {
    ceiling.saturating_sub(used.max(0) as u32)
}

/// 单个音频时长不得超过套餐上限；未提供时长则跳过
fn check_audio_duration(package: &Package, audio_duration_minutes: Option<f64>) -> AppResult<()> {
    let Some(minutes) = audio_duration_minutes else {
        return Ok(());
    };
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(AppError::ValidationError(
            "Audio duration must be a non-negative number".to_string(),
        ));
    }
    let allowed = package.audio_file_length.allowed_minutes();
    if minutes > allowed as f64 {
        return Err(AppError::RateLimitExceeded {
            message: format!(
                "Audio duration of {minutes:.0} minutes exceeds the {} limit of the {} package",
                package.audio_file_length, package.name
            ),
            reset_at: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{create_test_user, setup_test_db};
    use crate::database::DbPool;
    use crate::entities::PackageName;
    use crate::services::{ApiKeyService, PackageService};
    use chrono::{Duration, TimeZone};
    use sea_orm::ActiveModelTrait;
    use tempfile::NamedTempFile;

    struct Fixture {
        pool: DbPool,
        service: RateLimitService,
        _temp_file: NamedTempFile,
    }

    async fn fixture() -> Fixture {
        let (pool, temp_file) = setup_test_db().await;
        Fixture {
            service: RateLimitService::new(pool.clone(), RateLimitConfig::default()),
            pool,
            _temp_file: temp_file,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    impl Fixture {
        /// 创建用户和 key，并把 key 的计数/窗口设为给定值
        async fn key_with(
            &self,
            email: &str,
            package: PackageName,
            audio_usage: i32,
            text_usage: i32,
            next_reset: DateTime<Utc>,
        ) -> ValidatedApiKey {
            let package = PackageService::new(self.pool.clone())
                .find_by_name(package)
                .await
                .unwrap();
            let user = create_test_user(&self.pool, email).await;
            let key = ApiKeyService::new(self.pool.clone())
                .issue(user.id, package.id)
                .await
                .unwrap();

            let mut active: api_keys::ActiveModel = key.clone().into();
            active.audio_usage = Set(audio_usage);
            active.text_usage = Set(text_usage);
            active.last_reset = Set(next_reset - Duration::days(1));
            active.next_reset = Set(next_reset);
            active.update(&self.pool).await.unwrap();

            self.service.validate_api_key(&key.key).await.unwrap()
        }

        async fn reload(&self, validated: &ValidatedApiKey) -> api_keys::Model {
            api_keys::Entity::find_by_id(validated.api_key.id)
                .one(&self.pool)
                .await
                .unwrap()
                .unwrap()
        }

        async fn ip_row(&self, ip: &str) -> Option<ip_limits::Model> {
            ip_limits::Entity::find()
                .filter(ip_limits::Column::Ip.eq(ip))
                .one(&self.pool)
                .await
                .unwrap()
        }

        async fn set_ip_counts(&self, ip: &str, audio: i32, text: i32, last_reset: DateTime<Utc>) {
            ip_limits::ActiveModel {
                ip: Set(ip.to_string()),
                audio_count: Set(audio),
                text_count: Set(text),
                last_reset: Set(last_reset),
                ..Default::default()
            }
            .insert(&self.pool)
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_validate_api_key() {
        let f = fixture().await;
        let tomorrow = start_of_next_day(noon());
        let validated = f
            .key_with("valid@example.com", PackageName::Basic, 0, 0, tomorrow)
            .await;
        assert_eq!(validated.package.name, PackageName::Basic);
        assert_eq!(validated.user.email, "valid@example.com");

        assert!(matches!(
            f.service.validate_api_key("does-not-exist").await,
            Err(AppError::InvalidCredential(_))
        ));
        assert!(matches!(
            f.service.validate_api_key("   ").await,
            Err(AppError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_free_audio_limit_reached_leaves_usage_unchanged() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("free@example.com", PackageName::Free, 3, 0, start_of_next_day(now))
            .await;

        let err = f
            .service
            .check_and_update_limits_at(&validated, InputType::Audio, "10.0.0.1", None, now)
            .await
            .unwrap_err();
        match err {
            AppError::RateLimitExceeded { reset_at, .. } => {
                assert_eq!(reset_at, Some(start_of_next_day(now)));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let key = f.reload(&validated).await;
        assert_eq!(key.audio_usage, 3);
        // IP 计数随事务一起回滚
        assert!(f.ip_row("10.0.0.1").await.is_none());
    }

    #[tokio::test]
    async fn test_ip_ceiling_rejects_even_when_key_has_quota() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("ip@example.com", PackageName::Free, 0, 0, start_of_next_day(now))
            .await;
        f.set_ip_counts("10.0.0.2", 5, 0, now - Duration::hours(1)).await;

        let err = f
            .service
            .check_and_update_limits_at(&validated, InputType::Audio, "10.0.0.2", None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded { .. }));

        assert_eq!(f.reload(&validated).await.audio_usage, 0);
        assert_eq!(f.ip_row("10.0.0.2").await.unwrap().audio_count, 5);
    }

    #[tokio::test]
    async fn test_audio_duration_cites_package_unit() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("standard@example.com", PackageName::Standard, 0, 0, start_of_next_day(now))
            .await;

        let err = f
            .service
            .check_and_update_limits_at(&validated, InputType::Audio, "10.0.0.3", Some(65.0), now)
            .await
            .unwrap_err();
        match err {
            AppError::RateLimitExceeded { message, .. } => assert!(message.contains("1 hour")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.reload(&validated).await.audio_usage, 0);

        // 恰好等于上限可以通过
        let status = f
            .service
            .check_and_update_limits_at(&validated, InputType::Audio, "10.0.0.3", Some(60.0), now)
            .await
            .unwrap();
        assert_eq!(status.audio_duration_minutes, 60);
        assert_eq!(status.audio_remaining, FeatureLimit::Limited(49));
        assert_eq!(status.ip_audio_remaining, None);
    }

    #[tokio::test]
    async fn test_unlimited_feature_reports_unlimited() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("premium@example.com", PackageName::Premium, 0, 10_000, start_of_next_day(now))
            .await;

        let status = f
            .service
            .check_and_update_limits_at(&validated, InputType::Text, "10.0.0.4", None, now)
            .await
            .unwrap();
        assert_eq!(status.text_remaining, FeatureLimit::Unlimited);
        assert_eq!(status.audio_remaining, FeatureLimit::Unlimited);
        assert_eq!(status.audio_duration_minutes, 180);
        assert_eq!(f.reload(&validated).await.text_usage, 10_001);
    }

    #[tokio::test]
    async fn test_expired_window_resets_before_check() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("reset@example.com", PackageName::Standard, 5, 7, now - Duration::hours(2))
            .await;

        let status = f
            .service
            .check_and_update_limits_at(&validated, InputType::Audio, "10.0.0.5", None, now)
            .await
            .unwrap();

        let key = f.reload(&validated).await;
        assert_eq!(key.audio_usage, 1);
        assert_eq!(key.text_usage, 0);
        assert_eq!(key.last_reset, now);
        assert_eq!(key.next_reset, start_of_next_day(now));
        assert_eq!(status.next_reset, start_of_next_day(now));
        assert_eq!(status.audio_remaining, FeatureLimit::Limited(49));
    }

    #[tokio::test]
    async fn test_window_reset_allows_exhausted_key() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("exhausted@example.com", PackageName::Free, 0, 5, now)
            .await;

        // next_reset == now 视为已到期
        let status = f
            .service
            .check_and_update_limits_at(&validated, InputType::Text, "10.0.0.6", None, now)
            .await
            .unwrap();
        assert_eq!(status.text_remaining, FeatureLimit::Limited(4));
        assert_eq!(status.ip_text_remaining, Some(9));
        assert_eq!(status.ip_audio_remaining, Some(5));
    }

    #[tokio::test]
    async fn test_ip_counts_reset_on_new_day() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("ipday@example.com", PackageName::Free, 0, 0, start_of_next_day(now))
            .await;
        f.set_ip_counts("10.0.0.7", 5, 10, now - Duration::days(1)).await;

        let status = f
            .service
            .check_and_update_limits_at(&validated, InputType::Audio, "10.0.0.7", None, now)
            .await
            .unwrap();
        assert_eq!(status.ip_audio_remaining, Some(4));
        assert_eq!(status.ip_text_remaining, Some(10));

        let row = f.ip_row("10.0.0.7").await.unwrap();
        assert_eq!(row.audio_count, 1);
        assert_eq!(row.text_count, 0);
        assert_eq!(row.last_reset, now);

        // 同一天内不再清零
        let later = now + Duration::hours(3);
        f.service
            .check_and_update_limits_at(&validated, InputType::Audio, "10.0.0.7", None, later)
            .await
            .unwrap();
        let row = f.ip_row("10.0.0.7").await.unwrap();
        assert_eq!(row.audio_count, 2);
        assert_eq!(row.last_reset, now);
    }

    #[tokio::test]
    async fn test_ip_limit_not_applied_to_paid_packages() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("basic@example.com", PackageName::Basic, 0, 0, start_of_next_day(now))
            .await;
        f.set_ip_counts("10.0.0.8", 5, 10, now).await;

        let status = f
            .service
            .check_and_update_limits_at(&validated, InputType::Text, "10.0.0.8", None, now)
            .await
            .unwrap();
        assert_eq!(status.text_remaining, FeatureLimit::Limited(49));
        assert_eq!(f.ip_row("10.0.0.8").await.unwrap().text_count, 10);
    }

    #[tokio::test]
    async fn test_sequential_requests_stop_at_limit() {
        let f = fixture().await;
        let now = noon();
        let validated = f
            .key_with("seq@example.com", PackageName::Free, 0, 0, start_of_next_day(now))
            .await;

        for expected in (0..5).rev() {
            let status = f
                .service
                .check_and_update_limits_at(&validated, InputType::Text, "10.0.0.9", None, now)
                .await
                .unwrap();
            assert_eq!(status.text_remaining, FeatureLimit::Limited(expected));
        }
        assert!(
            f.service
                .check_and_update_limits_at(&validated, InputType::Text, "10.0.0.9", None, now)
                .await
                .is_err()
        );
        assert_eq!(f.reload(&validated).await.text_usage, 5);
        assert_eq!(f.ip_row("10.0.0.9").await.unwrap().text_count, 5);
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_exceed_limit() {
        let f = fixture().await;
        let now = Utc::now();
        let validated = f
            .key_with("race@example.com", PackageName::Basic, 0, 0, start_of_next_day(now))
            .await;

        let mut handles = Vec::new();
        for _ in 0..30 {
            let service = f.service.clone();
            let validated = validated.clone();
            handles.push(tokio::spawn(async move {
                service
                    .check_and_update_limits(&validated, InputType::Audio, "10.0.0.10", None)
                    .await
                    .is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 20);
        assert_eq!(f.reload(&validated).await.audio_usage, 20);
    }
}
