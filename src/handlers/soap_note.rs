use actix_web::{HttpMessage, HttpRequest, HttpResponse, ResponseError, Result, web};

use crate::error::AppError;
use crate::middlewares::{RateLimitMiddleware, current_user_id};
use crate::models::*;
use crate::services::SoapNoteService;

/// 限流中间件放行后写入的上下文
fn api_key_context(req: &HttpRequest) -> Result<ApiKeyContext, AppError> {
    req.extensions()
        .get::<ApiKeyContext>()
        .cloned()
        .ok_or_else(|| AppError::InvalidCredential("API key is required".to_string()))
}

async fn create_for_request(
    soap_note_service: &SoapNoteService,
    req: &HttpRequest,
    request: CreateSoapNoteRequest,
) -> HttpResponse {
    let context = match api_key_context(req) {
        Ok(c) => c,
        Err(e) => return e.error_response(),
    };

    log::info!(
        "Creating {} SOAP note for user {} on {} package",
        request.input_type,
        context.user_id,
        context.package.name
    );

    match soap_note_service.create(context.user_id, request).await {
        Ok(note) => HttpResponse::Created().json(ApiResponse::success(note)),
        Err(e) => e.error_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/soapnotes",
    tag = "soapnotes",
    request_body = CreateSoapNoteRequest,
    params(
        ("X-API-Key" = String, Header, description = "API key")
    ),
    responses(
        (status = 201, description = "SOAP note generated; X-RateLimit-* headers report remaining quota", body = SoapNoteResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 429, description = "Quota exhausted")
    )
)]
pub async fn create_soap_note(
    soap_note_service: web::Data<SoapNoteService>,
    req: HttpRequest,
    request: web::Json<CreateSoapNoteRequest>,
) -> Result<HttpResponse> {
    Ok(create_for_request(&soap_note_service, &req, request.into_inner()).await)
}

#[utoipa::path(
    post,
    path = "/api/soapnotes/{api_key}",
    tag = "soapnotes",
    request_body = CreateSoapNoteRequest,
    params(
        ("api_key" = String, Path, description = "API key, used when the header is absent")
    ),
    responses(
        (status = 201, description = "SOAP note generated", body = SoapNoteResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 429, description = "Quota exhausted")
    )
)]
pub async fn create_soap_note_with_key(
    soap_note_service: web::Data<SoapNoteService>,
    req: HttpRequest,
    request: web::Json<CreateSoapNoteRequest>,
) -> Result<HttpResponse> {
    Ok(create_for_request(&soap_note_service, &req, request.into_inner()).await)
}

#[utoipa::path(
    get,
    path = "/api/soapnotes",
    tag = "soapnotes",
    security(("bearer_auth" = [])),
    params(
        ("patient_name" = Option<String>, Query, description = "Filter by patient name"),
        ("therapist_name" = Option<String>, Query, description = "Filter by therapist name"),
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Page size")
    ),
    responses(
        (status = 200, description = "Notes of the signed-in user, newest first"),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_soap_notes(
    soap_note_service: web::Data<SoapNoteService>,
    req: HttpRequest,
    query: web::Query<SoapNoteQuery>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match soap_note_service.list(user_id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/soapnotes/{id}",
    tag = "soapnotes",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Note id")),
    responses(
        (status = 200, description = "Note", body = SoapNoteResponse),
        (status = 404, description = "Note not found")
    )
)]
pub async fn get_soap_note(
    soap_note_service: web::Data<SoapNoteService>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match soap_note_service.get(user_id, path.into_inner()).await {
        Ok(note) => Ok(HttpResponse::Ok().json(ApiResponse::success(note))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    put,
    path = "/api/soapnotes/{id}",
    tag = "soapnotes",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Note id")),
    request_body = UpdateSoapNoteRequest,
    responses(
        (status = 200, description = "Updated note", body = SoapNoteResponse),
        (status = 404, description = "Note not found")
    )
)]
pub async fn update_soap_note(
    soap_note_service: web::Data<SoapNoteService>,
    req: HttpRequest,
    path: web::Path<i32>,
    request: web::Json<UpdateSoapNoteRequest>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match soap_note_service
        .update(user_id, path.into_inner(), request.into_inner())
        .await
    {
        Ok(note) => Ok(HttpResponse::Ok().json(ApiResponse::success(note))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    delete,
    path = "/api/soapnotes/{id}",
    tag = "soapnotes",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Note id")),
    responses(
        (status = 200, description = "Note deleted"),
        (status = 404, description = "Note not found")
    )
)]
pub async fn delete_soap_note(
    soap_note_service: web::Data<SoapNoteService>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match soap_note_service.delete(user_id, path.into_inner()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Note deleted"))),
        Err(e) => Ok(e.error_response()),
    }
}

/// POST 走限流中间件；GET/PUT/DELETE 由中间件直接放行，靠 JWT 鉴权
pub fn soap_note_config(cfg: &mut web::ServiceConfig, limiter: RateLimitMiddleware) {
    cfg.service(
        web::scope("/soapnotes")
            .service(
                web::resource("")
                    .wrap(limiter.clone())
                    .route(web::post().to(create_soap_note))
                    .route(web::get().to(list_soap_notes)),
            )
            .service(
                web::resource("/{param}")
                    .wrap(limiter)
                    .route(web::post().to(create_soap_note_with_key))
                    .route(web::get().to(get_soap_note))
                    .route(web::put().to(update_soap_note))
                    .route(web::delete().to(delete_soap_note)),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::database::test_support::{create_test_user, setup_test_db};
    use crate::entities::PackageName;
    use crate::error::AppResult;
    use crate::middlewares::{AuthenticatedUser, HEADER_TEXT_REMAINING};
    use crate::services::{ApiKeyService, NoteGenerator, PackageService, RateLimitService};
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use futures_util::future::BoxFuture;
    use serde_json::{Value, json};
    use std::sync::Arc;

    struct EchoGenerator;

    impl NoteGenerator for EchoGenerator {
        fn transcribe<'a>(
            &'a self,
            _audio: &'a [u8],
            _file_name: &'a str,
            _mime_type: &'a str,
        ) -> BoxFuture<'a, AppResult<String>> {
            Box::pin(async { Ok(String::new()) })
        }

        fn structure<'a>(
            &'a self,
            text: &'a str,
            _context: &'a NoteContext,
        ) -> BoxFuture<'a, AppResult<SoapSections>> {
            Box::pin(async move {
                Ok(SoapSections {
                    subjective: text.to_string(),
                    objective: "Observed".to_string(),
                    assessment: "Assessed".to_string(),
                    plan: "Planned".to_string(),
                })
            })
        }
    }

    fn text_body() -> Value {
        json!({
            "type": "Physical Therapy",
            "input_type": "text",
            "date": "2025-03-01",
            "time": "10:30",
            "icd10": "M54.5",
            "cpt": "97110",
            "text": "Patient reports lower back pain for two weeks after lifting boxes at work with stiffness in the morning"
        })
    }

    #[actix_web::test]
    async fn test_create_soap_note_through_limiter() {
        let (pool, _db) = setup_test_db().await;
        let free = PackageService::new(pool.clone())
            .find_by_name(PackageName::Free)
            .await
            .unwrap();
        let user = create_test_user(&pool, "clinic@example.com").await;
        let key = ApiKeyService::new(pool.clone())
            .issue(user.id, free.id)
            .await
            .unwrap();

        let limiter = RateLimitMiddleware::new(RateLimitService::new(
            pool.clone(),
            RateLimitConfig::default(),
        ))
        .unwrap();
        let notes = SoapNoteService::new(pool.clone(), Arc::new(EchoGenerator));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(notes))
                .service(web::scope("/api").configure(|cfg| soap_note_config(cfg, limiter))),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/soapnotes")
            .insert_header(("X-API-Key", key.key.clone()))
            .peer_addr("10.0.0.8:5000".parse().unwrap())
            .set_json(text_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(
            resp.headers().get(HEADER_TEXT_REMAINING).unwrap().to_str().unwrap(),
            "4"
        );
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["objective"], "Observed");
        assert_eq!(body["data"]["icd10"], "M54.5");

        // 路径中携带 key
        let req = test::TestRequest::post()
            .uri(&format!("/api/soapnotes/{}", key.key))
            .peer_addr("10.0.0.8:5000".parse().unwrap())
            .set_json(text_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn test_read_routes_require_signed_in_user() {
        let (pool, _db) = setup_test_db().await;
        let limiter = RateLimitMiddleware::new(RateLimitService::new(
            pool.clone(),
            RateLimitConfig::default(),
        ))
        .unwrap();
        let notes = SoapNoteService::new(pool.clone(), Arc::new(EchoGenerator));
        let user = create_test_user(&pool, "reader@example.com").await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(notes))
                .service(web::scope("/api").configure(|cfg| soap_note_config(cfg, limiter))),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/soapnotes").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get().uri("/api/soapnotes").to_request();
        req.extensions_mut().insert(AuthenticatedUser {
            id: user.id,
            role: "user".to_string(),
        });
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["total"], 0);

        let req = test::TestRequest::get().uri("/api/soapnotes/999").to_request();
        req.extensions_mut().insert(AuthenticatedUser {
            id: user.id,
            role: "user".to_string(),
        });
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
