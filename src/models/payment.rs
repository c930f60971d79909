use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::{PaymentPlan, payment_entity};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentIntentRequest {
    pub package_id: i32,
    pub plan: PaymentPlan,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentIntentResponse {
    pub payment_id: i32,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
    /// 支付尚未成功时用于确认的 payment method
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: i32,
    pub package_id: i32,
    pub stripe_payment_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub plan: PaymentPlan,
    pub coupon_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<payment_entity::Model> for PaymentResponse {
    fn from(m: payment_entity::Model) -> Self {
        PaymentResponse {
            id: m.id,
            package_id: m.package_id,
            stripe_payment_id: m.stripe_payment_id,
            amount_cents: m.amount_cents,
            currency: m.currency,
            status: m.status,
            plan: m.plan,
            coupon_code: m.coupon_code,
            created_at: m.created_at,
        }
    }
}
