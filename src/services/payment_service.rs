use chrono::Utc;
use futures_util::future::BoxFuture;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::sync::Arc;

use crate::entities::{PaymentPlan, package_entity as packages, payment_entity as payments};
use crate::error::{AppError, AppResult};
use crate::external::{PaymentIntent, StripeService};
use crate::models::{
    ConfirmPaymentRequest, CreatePaymentIntentRequest, CreatePaymentIntentResponse, Package,
    PaymentResponse,
};
use crate::services::api_key_service::rebind_api_key;

const SUCCEEDED: &str = "succeeded";

/// 支付网关接口（生产实现为 Stripe）
pub trait PaymentGateway: Send + Sync {
    fn create_intent<'a>(
        &'a self,
        amount_cents: i64,
        currency: &'a str,
        metadata: Vec<(&'a str, String)>,
    ) -> BoxFuture<'a, AppResult<PaymentIntent>>;

    fn retrieve_intent<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<PaymentIntent>>;

    fn confirm_intent<'a>(
        &'a self,
        id: &'a str,
        payment_method_id: &'a str,
    ) -> BoxFuture<'a, AppResult<PaymentIntent>>;
}

impl PaymentGateway for StripeService {
    fn create_intent<'a>(
        &'a self,
        amount_cents: i64,
        currency: &'a str,
        metadata: Vec<(&'a str, String)>,
    ) -> BoxFuture<'a, AppResult<PaymentIntent>> {
        Box::pin(async move {
            self.create_payment_intent(amount_cents, currency, &metadata)
                .await
        })
    }

    fn retrieve_intent<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<PaymentIntent>> {
        Box::pin(self.retrieve_payment_intent(id))
    }

    fn confirm_intent<'a>(
        &'a self,
        id: &'a str,
        payment_method_id: &'a str,
    ) -> BoxFuture<'a, AppResult<PaymentIntent>> {
        Box::pin(self.confirm_payment_intent(id, payment_method_id))
    }
}

#[derive(Clone)]
pub struct PaymentService {
    pool: DatabaseConnection,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(pool: DatabaseConnection, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { pool, gateway }
    }

    /// 创建支付意图并记录 payments 行，返回 client secret
    pub async fn create_intent(
        &self,
        user_id: i32,
        request: CreatePaymentIntentRequest,
    ) -> AppResult<CreatePaymentIntentResponse> {
        let package: Package = packages::Entity::find_by_id(request.package_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Package not found".to_string()))?
            .into();
        if !package.is_active {
            return Err(AppError::ValidationError("Package is not available".to_string()));
        }

        let amount_cents = match request.plan {
            PaymentPlan::Monthly => package.price_cents,
            PaymentPlan::Yearly => package.yearly_price_cents(),
        };
        if amount_cents <= 0 {
            return Err(AppError::ValidationError("Invalid package amount".to_string()));
        }

        let currency = package.currency.to_lowercase();
        let metadata = vec![
            ("user_id", user_id.to_string()),
            ("package_id", package.id.to_string()),
            ("package_name", package.name.to_string()),
            ("plan", request.plan.to_string()),
        ];
        let intent = self
            .gateway
            .create_intent(amount_cents, &currency, metadata)
            .await?;
        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            AppError::ExternalApiError("Payment intent has no client secret".to_string())
        })?;

        let now = Utc::now();
        let payment = payments::ActiveModel {
            user_id: Set(user_id),
            package_id: Set(package.id),
            stripe_payment_id: Set(intent.id.clone()),
            amount_cents: Set(amount_cents),
            currency: Set(currency.clone()),
            status: Set(intent.status.clone()),
            plan: Set(request.plan),
            coupon_code: Set(request.coupon_code.filter(|c| !c.trim().is_empty())),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;

        log::info!(
            "Payment {} created for user {user_id}: package={} plan={} amount={amount_cents}",
            payment.id,
            package.name,
            request.plan
        );

        Ok(CreatePaymentIntentResponse {
            payment_id: payment.id,
            payment_intent_id: intent.id,
            client_secret,
            amount_cents,
            currency,
        })
    }

    /// 同步 Stripe 状态；成功时把用户的 API key 切换到所购套餐。已成功的支付重复确认直接返回
    pub async fn confirm(
        &self,
        user_id: i32,
        request: ConfirmPaymentRequest,
    ) -> AppResult<PaymentResponse> {
        let payment = payments::Entity::find()
            .filter(payments::Column::StripePaymentId.eq(request.payment_intent_id.as_str()))
            .filter(payments::Column::UserId.eq(user_id))
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

        if payment.status == SUCCEEDED {
            return Ok(payment.into());
        }

        let mut intent = self
            .gateway
            .retrieve_intent(&request.payment_intent_id)
            .await?;
        if !intent.succeeded() {
            if let Some(method) = request.payment_method_id.as_deref().filter(|m| !m.is_empty()) {
                intent = self
                    .gateway
                    .confirm_intent(&request.payment_intent_id, method)
                    .await?;
            }
        }

        let (updated, upgraded) = self.apply_intent_status(&payment, &intent).await?;
        if upgraded {
            log::info!(
                "Payment {} succeeded, user {user_id} moved to package {}",
                updated.id,
                updated.package_id
            );
        } else {
            log::info!("Payment {} for user {user_id} is now {}", updated.id, updated.status);
        }
        Ok(updated.into())
    }

    /// 写入网关返回的状态；只有把行从未成功改为成功的那一次才切换套餐。
    /// 已成功的行不会被覆盖，并发确认时最多一次重置配额。
    async fn apply_intent_status(
        &self,
        payment: &payments::Model,
        intent: &PaymentIntent,
    ) -> AppResult<(payments::Model, bool)> {
        let now = Utc::now();
        let txn = self.pool.begin().await?;

        let result = payments::Entity::update_many()
            .col_expr(payments::Column::Status, Expr::value(intent.status.clone()))
            .col_expr(payments::Column::UpdatedAt, Expr::value(now))
            .filter(payments::Column::Id.eq(payment.id))
            .filter(payments::Column::Status.ne(SUCCEEDED))
            .exec(&txn)
            .await?;

        let upgraded = intent.succeeded() && result.rows_affected == 1;
        if upgraded {
            rebind_api_key(&txn, payment.user_id, payment.package_id, now).await?;
        }

        let updated = payments::Entity::find_by_id(payment.id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;
        txn.commit().await?;

        Ok((updated, upgraded))
    }
}
