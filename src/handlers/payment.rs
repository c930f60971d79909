use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

use crate::middlewares::current_user_id;
use crate::models::*;
use crate::services::PaymentService;

#[utoipa::path(
    post,
    path = "/api/payments/create-intent",
    tag = "payments",
    security(("bearer_auth" = [])),
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Payment intent created", body = CreatePaymentIntentResponse),
        (status = 400, description = "Package cannot be purchased"),
        (status = 404, description = "Package not found"),
        (status = 502, description = "Stripe error")
    )
)]
pub async fn create_payment_intent(
    payment_service: web::Data<PaymentService>,
    req: HttpRequest,
    request: web::Json<CreatePaymentIntentRequest>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match payment_service.create_intent(user_id, request.into_inner()).await {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/api/payments/confirm",
    tag = "payments",
    security(("bearer_auth" = [])),
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment status refreshed; on success the API key moves to the purchased package", body = PaymentResponse),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn confirm_payment(
    payment_service: web::Data<PaymentService>,
    req: HttpRequest,
    request: web::Json<ConfirmPaymentRequest>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match payment_service.confirm(user_id, request.into_inner()).await {
        Ok(payment) => Ok(HttpResponse::Ok().json(ApiResponse::success(payment))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn payment_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/payments")
            .route("/create-intent", web::post().to(create_payment_intent))
            .route("/confirm", web::post().to(confirm_payment)),
    );
}
