use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

use crate::middlewares::current_user_id;
use crate::models::*;
use crate::services::ApiKeyService;

#[utoipa::path(
    get,
    path = "/api/usage",
    tag = "usage",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "API key, package and usage in the current window", body = UsageResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "No API key issued")
    )
)]
pub async fn get_usage(
    api_key_service: web::Data<ApiKeyService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match api_key_service.usage_for_user(user_id).await {
        Ok(usage) => Ok(HttpResponse::Ok().json(ApiResponse::success(usage))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn usage_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/usage", web::get().to(get_usage));
}
