use chrono::{Duration, Utc};
use futures_util::future::BoxFuture;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::entities::{PackageName, package_entity as packages, user_entity as users};
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthResponse, ForgotPasswordRequest, ProfileResponse, ResetPasswordRequest, SigninRequest,
    SignupRequest, UserResponse, VerifyOtpRequest,
};
use crate::services::ApiKeyService;
use crate::services::api_key_service::issue_api_key;
use crate::utils::*;
use std::sync::Arc;

const DEFAULT_ROLE: &str = "user";
const OTP_TTL_MINUTES: i64 = 10;

/// 重置密码验证码的投递接口
pub trait Mailer: Send + Sync {
    fn send_otp<'a>(
        &'a self,
        email: &'a str,
        name: &'a str,
        otp: &'a str,
    ) -> BoxFuture<'a, AppResult<()>>;
}

#[derive(Clone)]
pub struct AuthService {
    pool: DatabaseConnection,
    jwt_service: JwtService,
    mailer: Arc<dyn Mailer>,
}

impl AuthService {
    pub fn new(pool: DatabaseConnection, jwt_service: JwtService, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            pool,
            jwt_service,
            mailer,
        }
    }

    /// 注册：创建用户并签发绑定免费套餐的 API key（同一事务）
    pub async fn signup(&self, request: SignupRequest) -> AppResult<AuthResponse> {
        let name = request.name.trim().to_string();
        if name.is_empty() || name.chars().count() > 100 {
            return Err(AppError::ValidationError(
                "Name must be between 1 and 100 characters".to_string(),
            ));
        }
        let email = normalize_email(&request.email)?;
        validate_password(&request.password)?;

        let existing = users::Entity::find()
            .filter(users::Column::Email.eq(email.as_str()))
            .one(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(AppError::ValidationError("Email already registered".to_string()));
        }

        let free_package = packages::Entity::find()
            .filter(packages::Column::Name.eq(PackageName::Free))
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::InternalError("Free package is not configured".to_string()))?;

        let password_hash = hash_password(&request.password)?;
        let now = Utc::now();

        let txn = self.pool.begin().await?;
        let user = users::ActiveModel {
            name: Set(name),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(DEFAULT_ROLE.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        let api_key = issue_api_key(&txn, user.id, free_package.id, now).await?;
        txn.commit().await?;

        log::info!("User {} signed up", user.id);

        let mut response = self.issue_tokens(user)?;
        response.api_key = Some(api_key.key);
        Ok(response)
    }

    pub async fn signin(&self, request: SigninRequest) -> AppResult<AuthResponse> {
        let invalid = || AppError::AuthError("Invalid email or password".to_string());

        let email = normalize_email(&request.email).map_err(|_| invalid())?;
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.pool)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&request.password, &user.password_hash)? {
            return Err(invalid());
        }

        self.issue_tokens(user)
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<AuthResponse> {
        let claims = self.jwt_service.verify_refresh_token(refresh_token)?;
        let user = self.get_user(claims.user_id()?).await?;

        let access_token = self.jwt_service.generate_access_token(user.id, &user.role)?;
        Ok(AuthResponse {
            user: UserResponse::from(user),
            access_token,
            refresh_token: refresh_token.to_string(),
            expires_in: self.jwt_service.get_access_token_expires_in(),
            api_key: None,
        })
    }

    pub async fn get_user(&self, user_id: i32) -> AppResult<users::Model> {
        users::Entity::find_by_id(user_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// 用户资料；尚未签发 API key 时不带 usage
    pub async fn profile(&self, user_id: i32) -> AppResult<ProfileResponse> {
        let user = self.get_user(user_id).await?;
        let usage = match ApiKeyService::new(self.pool.clone())
            .usage_for_user(user_id)
            .await
        {
            Ok(usage) => Some(usage),
            Err(AppError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(ProfileResponse {
            user: UserResponse::from(user),
            usage,
        })
    }

    /// 生成六位验证码，只保存其哈希，10 分钟内有效
    pub async fn forgot_password(&self, request: ForgotPasswordRequest) -> AppResult<()> {
        let user = self.find_by_email(&request.email).await?;
        let otp = generate_otp();
        let now = Utc::now();

        let mut active: users::ActiveModel = user.clone().into();
        active.otp_hash = Set(Some(hash_password(&otp)?));
        active.otp_expires_at = Set(Some(now + Duration::minutes(OTP_TTL_MINUTES)));
        active.otp_verified = Set(false);
        active.updated_at = Set(now);
        active.update(&self.pool).await?;

        self.mailer.send_otp(&user.email, &user.name, &otp).await?;
        log::info!("Password reset code issued for user {}", user.id);
        Ok(())
    }

    pub async fn verify_otp(&self, request: VerifyOtpRequest) -> AppResult<()> {
        let invalid = || AppError::ValidationError("Invalid or expired OTP".to_string());

        let user = self.find_by_email(&request.email).await?;
        let (Some(otp_hash), Some(expires_at)) = (user.otp_hash.as_deref(), user.otp_expires_at)
        else {
            return Err(invalid());
        };
        if expires_at < Utc::now() || !verify_password(request.otp.trim(), otp_hash)? {
            return Err(invalid());
        }

        let mut active: users::ActiveModel = user.into();
        active.otp_verified = Set(true);
        active.updated_at = Set(Utc::now());
        active.update(&self.pool).await?;
        Ok(())
    }

    /// 仅在验证码已验证且未过期时允许重置；成功后验证码作废
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> AppResult<()> {
        let user = self.find_by_email(&request.email).await?;
        let still_valid = user.otp_expires_at.is_some_and(|at| at >= Utc::now());
        if !user.otp_verified || !still_valid {
            return Err(AppError::ValidationError(
                "OTP verification required".to_string(),
            ));
        }
        validate_password(&request.new_password)?;

        let user_id = user.id;
        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(hash_password(&request.new_password)?);
        active.otp_hash = Set(None);
        active.otp_expires_at = Set(None);
        active.otp_verified = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&self.pool).await?;

        log::info!("Password reset for user {}", user_id);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<users::Model> {
        let email = normalize_email(email)?;
        users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    fn issue_tokens(&self, user: users::Model) -> AppResult<AuthResponse> {
        let access_token = self.jwt_service.generate_access_token(user.id, &user.role)?;
        let refresh_token = self.jwt_service.generate_refresh_token(user.id, &user.role)?;

        Ok(AuthResponse {
            user: UserResponse::from(user),
            access_token,
            refresh_token,
            expires_in: self.jwt_service.get_access_token_expires_in(),
            api_key: None,
        })
    }
}
