//! API key 计量中间件：只处理 POST，其余请求原样放行

use actix_web::body::EitherBody;
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::Method;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage, HttpRequest, web};
use futures_util::future::LocalBoxFuture;
use regex::Regex;
use std::future::{Ready, ready};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;

use crate::entities::InputType;
use crate::error::{AppError, AppResult};
use crate::models::{ApiKeyContext, CreateSoapNoteRequest, QuotaStatus};
use crate::services::RateLimitService;

pub const HEADER_AUDIO_REMAINING: &str = "x-ratelimit-audio-remaining";
pub const HEADER_TEXT_REMAINING: &str = "x-ratelimit-text-remaining";
pub const HEADER_AUDIO_DURATION: &str = "x-ratelimit-audio-duration";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_IP_AUDIO_REMAINING: &str = "x-ratelimit-ip-audio-remaining";
pub const HEADER_IP_TEXT_REMAINING: &str = "x-ratelimit-ip-text-remaining";

#[derive(Debug, Clone, Copy, PartialEq)]
struct MeteredRequest {
    input_type: InputType,
    audio_duration_minutes: Option<f64>,
}

/// 完整解析并校验笔记请求；不合法的请求不计入配额
fn parse_metered_body(body: &[u8]) -> AppResult<MeteredRequest> {
    let request: CreateSoapNoteRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::ValidationError(format!("Invalid request body: {e}")))?;
    request.validate()?;

    let audio_duration_minutes = match request.input_type {
        InputType::Audio => request.audio.as_ref().and_then(|a| a.duration_minutes),
        InputType::Text => None,
    };

    Ok(MeteredRequest {
        input_type: request.input_type,
        audio_duration_minutes,
    })
}

/// 先取 header，再从 URL 中按正则第一个捕获组取
pub fn extract_api_key(req: &HttpRequest, header_name: &str, url_pattern: &Regex) -> Option<String> {
    let from_header = req
        .headers()
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(key) = from_header {
        return Some(key.to_string());
    }

    url_pattern
        .captures(req.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|k| !k.is_empty())
}

/// 客户端 IP（去掉端口）；取不到时为 "unknown"
pub fn client_ip(req: &HttpRequest) -> String {
    let info = req.connection_info();
    let Some(raw) = info.realip_remote_addr() else {
        return "unknown".to_string();
    };
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }
    if let Ok(ip) = raw.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return ip.to_string();
    }
    raw.to_string()
}

fn quota_headers(status: &QuotaStatus) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        (HEADER_AUDIO_REMAINING, status.audio_remaining.to_string()),
        (HEADER_TEXT_REMAINING, status.text_remaining.to_string()),
        (HEADER_AUDIO_DURATION, status.audio_duration_minutes.to_string()),
        (HEADER_RESET, status.next_reset.timestamp_millis().to_string()),
    ];
    if let Some(n) = status.ip_audio_remaining {
        headers.push((HEADER_IP_AUDIO_REMAINING, n.to_string()));
    }
    if let Some(n) = status.ip_text_remaining {
        headers.push((HEADER_IP_TEXT_REMAINING, n.to_string()));
    }
    headers
}

struct RateLimitState {
    service: RateLimitService,
    header_name: String,
    url_pattern: Regex,
}

#[derive(Clone)]
pub struct RateLimitMiddleware {
    state: Arc<RateLimitState>,
}

impl RateLimitMiddleware {
    pub fn new(service: RateLimitService) -> AppResult<Self> {
        let config = service.config().clone();
        let url_pattern = Regex::new(&config.url_pattern).map_err(|e| {
            AppError::ConfigError(format!("Invalid rate_limit.url_pattern: {e}"))
        })?;
        Ok(Self {
            state: Arc::new(RateLimitState {
                service,
                header_name: config.api_key_header,
                url_pattern,
            }),
        })
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    state: Arc<RateLimitState>,
}

impl<S> RateLimitMiddlewareService<S> {
    /// 校验 key，校验并还原请求体，最后才扣减配额
    async fn admit(state: &RateLimitState, req: &mut ServiceRequest) -> Result<QuotaStatus, Error> {
        let api_key = extract_api_key(req.request(), &state.header_name, &state.url_pattern)
            .ok_or_else(|| AppError::InvalidCredential("API key is required".to_string()))?;
        let validated = state.service.validate_api_key(&api_key).await?;

        let body = req.extract::<web::Bytes>().await?;
        let metered = parse_metered_body(&body)?;
        req.set_payload(Payload::from(body));

        let ip = client_ip(req.request());
        let status = state
            .service
            .check_and_update_limits(
                &validated,
                metered.input_type,
                &ip,
                metered.audio_duration_minutes,
            )
            .await?;

        req.extensions_mut().insert(ApiKeyContext {
            api_key_id: validated.api_key.id,
            user_id: validated.user.id,
            package: validated.package,
        });
        Ok(status)
    }
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        if req.method() != Method::POST {
            let fut = self.service.call(req);
            return Box::pin(async move { Ok(fut.await?.map_into_left_body()) });
        }

        let service = Rc::clone(&self.service);
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            let status = match Self::admit(&state, &mut req).await {
                Ok(status) => status,
                Err(e) => return Ok(req.error_response(e).map_into_right_body()),
            };

            let mut res = service.call(req).await?;
            let headers = res.headers_mut();
            for (name, value) in quota_headers(&status) {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::database::DbPool;
    use crate::database::test_support::{create_test_user, setup_test_db};
    use crate::entities::{PackageName, api_key_entity as api_keys};
    use crate::services::{ApiKeyService, PackageService};
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;
    use actix_web::{App, HttpResponse};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use sea_orm::EntityTrait;
    use serde_json::{Value, json};

    async fn echo(req: HttpRequest, body: web::Json<Value>) -> HttpResponse {
        let user_id = req.extensions().get::<ApiKeyContext>().map(|c| c.user_id);
        HttpResponse::Ok().json(json!({ "user_id": user_id, "body": body.into_inner() }))
    }

    async fn issue_key(pool: &DbPool, email: &str, package: PackageName) -> (i32, String) {
        let package = PackageService::new(pool.clone())
            .find_by_name(package)
            .await
            .unwrap();
        let user = create_test_user(pool, email).await;
        let key = ApiKeyService::new(pool.clone())
            .issue(user.id, package.id)
            .await
            .unwrap();
        (user.id, key.key)
    }

    async fn usage(pool: &DbPool, key: &str) -> (i32, i32) {
        use sea_orm::{ColumnTrait, QueryFilter};
        let row = api_keys::Entity::find()
            .filter(api_keys::Column::Key.eq(key))
            .one(pool)
            .await
            .unwrap()
            .unwrap();
        (row.audio_usage, row.text_usage)
    }

    fn limiter(pool: &DbPool) -> RateLimitMiddleware {
        RateLimitMiddleware::new(RateLimitService::new(pool.clone(), RateLimitConfig::default()))
            .unwrap()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn text_body(text: &str) -> Value {
        json!({
            "type": "Physical Therapy",
            "input_type": "text",
            "text": text,
            "date": "2025-03-01",
            "time": "10:30",
            "icd10": "M54.5",
            "cpt": "97110"
        })
    }

    fn audio_body(duration_minutes: f64) -> Value {
        json!({
            "type": "Physical Therapy",
            "input_type": "audio",
            "audio": {
                "file_name": "session.mp3",
                "mime_type": "audio/mpeg",
                "content_base64": STANDARD.encode(b"ID3 fake audio"),
                "duration_minutes": duration_minutes
            },
            "date": "2025-03-01",
            "time": "10:30",
            "icd10": "M54.5",
            "cpt": "97110"
        })
    }

    #[test]
    fn test_parse_metered_body() {
        let body = serde_json::to_vec(&audio_body(12.5)).unwrap();
        let audio = parse_metered_body(&body).unwrap();
        assert_eq!(audio.input_type, InputType::Audio);
        assert_eq!(audio.audio_duration_minutes, Some(12.5));

        let body = serde_json::to_vec(&text_body("hello")).unwrap();
        let text = parse_metered_body(&body).unwrap();
        assert_eq!(text.input_type, InputType::Text);
        assert_eq!(text.audio_duration_minutes, None);

        assert!(parse_metered_body(br#"{"input_type":"video"}"#).is_err());
        assert!(parse_metered_body(br#"{"input_type":"text"}"#).is_err());
        assert!(parse_metered_body(b"not json").is_err());

        let mut wrong_mime = audio_body(5.0);
        wrong_mime["audio"]["mime_type"] = json!("application/pdf");
        assert!(parse_metered_body(&serde_json::to_vec(&wrong_mime).unwrap()).is_err());
    }

    #[test]
    fn test_extract_api_key() {
        let pattern = Regex::new(r"^/api/soapnotes/([^/]+)").unwrap();

        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes/from-url")
            .insert_header(("X-API-Key", "from-header"))
            .to_http_request();
        assert_eq!(
            extract_api_key(&req, "X-API-Key", &pattern).as_deref(),
            Some("from-header")
        );

        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes/from-url")
            .to_http_request();
        assert_eq!(
            extract_api_key(&req, "X-API-Key", &pattern).as_deref(),
            Some("from-url")
        );

        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes")
            .to_http_request();
        assert_eq!(extract_api_key(&req, "X-API-Key", &pattern), None);
    }

    #[test]
    fn test_client_ip_strips_port() {
        let req = actix_test::TestRequest::default()
            .peer_addr(peer())
            .to_http_request();
        assert_eq!(client_ip(&req), "127.0.0.1");

        let req = actix_test::TestRequest::default().to_http_request();
        assert_eq!(client_ip(&req), "unknown");
    }

    #[actix_web::test]
    async fn test_missing_key_is_rejected_and_get_passes() {
        let (pool, _temp_file) = setup_test_db().await;
        let app = actix_test::init_service(
            App::new().service(
                web::resource("/api/soapnotes")
                    .wrap(limiter(&pool))
                    .route(web::post().to(echo))
                    .route(web::get().to(HttpResponse::Ok)),
            ),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes")
            .set_json(text_body("hello"))
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = actix_test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INVALID_API_KEY");

        let req = actix_test::TestRequest::get().uri("/api/soapnotes").to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_admitted_request_gets_headers_and_body() {
        let (pool, _temp_file) = setup_test_db().await;
        let (user_id, key) = issue_key(&pool, "mw@example.com", PackageName::Free).await;
        let app = actix_test::init_service(
            App::new().service(
                web::resource("/api/soapnotes")
                    .wrap(limiter(&pool))
                    .route(web::post().to(echo)),
            ),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes")
            .peer_addr(peer())
            .insert_header(("X-API-Key", key.as_str()))
            .set_json(text_body("hello"))
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);

        let header = |name: &str| {
            res.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        assert_eq!(header(HEADER_TEXT_REMAINING).as_deref(), Some("4"));
        assert_eq!(header(HEADER_AUDIO_REMAINING).as_deref(), Some("3"));
        assert_eq!(header(HEADER_AUDIO_DURATION).as_deref(), Some("10"));
        assert_eq!(header(HEADER_IP_TEXT_REMAINING).as_deref(), Some("9"));
        assert_eq!(header(HEADER_IP_AUDIO_REMAINING).as_deref(), Some("5"));
        assert!(header(HEADER_RESET).is_some());

        let body: Value = actix_test::read_body_json(res).await;
        assert_eq!(body["user_id"], user_id);
        assert_eq!(body["body"]["text"], "hello");
    }

    #[actix_web::test]
    async fn test_key_in_url_and_duration_limit() {
        let (pool, _temp_file) = setup_test_db().await;
        let (_, key) = issue_key(&pool, "url@example.com", PackageName::Basic).await;
        let app = actix_test::init_service(
            App::new().service(
                web::resource("/api/soapnotes/{key}")
                    .wrap(limiter(&pool))
                    .route(web::post().to(echo)),
            ),
        )
        .await;

        // Basic 套餐单个音频上限 30 分钟
        let req = actix_test::TestRequest::post()
            .uri(&format!("/api/soapnotes/{key}"))
            .peer_addr(peer())
            .set_json(audio_body(45.0))
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: Value = actix_test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert!(body["error"]["message"].as_str().unwrap().contains("30 minutes"));

        let req = actix_test::TestRequest::post()
            .uri(&format!("/api/soapnotes/{key}"))
            .peer_addr(peer())
            .set_json(audio_body(30.0))
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(HEADER_AUDIO_REMAINING).unwrap(), "19");
        assert!(res.headers().get(HEADER_IP_AUDIO_REMAINING).is_none());
    }

    #[actix_web::test]
    async fn test_invalid_key_and_exhausted_quota() {
        let (pool, _temp_file) = setup_test_db().await;
        let (_, key) = issue_key(&pool, "bad@example.com", PackageName::Free).await;
        let app = actix_test::init_service(
            App::new().service(
                web::resource("/api/soapnotes")
                    .wrap(limiter(&pool))
                    .route(web::post().to(echo)),
            ),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes")
            .insert_header(("X-API-Key", "nope"))
            .set_json(text_body("hello"))
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        // 免费套餐文本 5 次后返回 429，且 reset_at 存在
        for _ in 0..5 {
            let req = actix_test::TestRequest::post()
                .uri("/api/soapnotes")
                .peer_addr(peer())
                .insert_header(("X-API-Key", key.as_str()))
                .set_json(text_body("hello"))
                .to_request();
            let res = actix_test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::OK);
        }
        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes")
            .peer_addr(peer())
            .insert_header(("X-API-Key", key.as_str()))
            .set_json(text_body("hello"))
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: Value = actix_test::read_body_json(res).await;
        assert!(body["error"]["reset_at"].is_i64());
    }

    #[actix_web::test]
    async fn test_invalid_body_is_not_charged() {
        let (pool, _temp_file) = setup_test_db().await;
        let (_, key) = issue_key(&pool, "invalid@example.com", PackageName::Free).await;
        let app = actix_test::init_service(
            App::new().service(
                web::resource("/api/soapnotes")
                    .wrap(limiter(&pool))
                    .route(web::post().to(echo)),
            ),
        )
        .await;

        let mut no_icd10 = text_body("hello");
        no_icd10["icd10"] = json!("");
        let mut bad_type = text_body("hello");
        bad_type["type"] = json!("Astrology");
        let mut bad_mime = audio_body(5.0);
        bad_mime["audio"]["mime_type"] = json!("text/plain");
        let invalid = [
            json!({ "input_type": "text" }),
            json!({ "input_type": "video" }),
            no_icd10,
            bad_type,
            bad_mime,
            json!({ "type": "Physical Therapy", "input_type": "audio", "date": "2025-03-01",
                    "time": "10:30", "icd10": "M54.5", "cpt": "97110" }),
        ];

        // 多于免费额度的非法请求都只返回 400
        for body in invalid.iter().cycle().take(8) {
            let req = actix_test::TestRequest::post()
                .uri("/api/soapnotes")
                .peer_addr(peer())
                .insert_header(("X-API-Key", key.as_str()))
                .set_json(body)
                .to_request();
            let res = actix_test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(usage(&pool, &key).await, (0, 0));

        let req = actix_test::TestRequest::post()
            .uri("/api/soapnotes")
            .peer_addr(peer())
            .insert_header(("X-API-Key", key.as_str()))
            .set_json(text_body("hello"))
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(HEADER_TEXT_REMAINING).unwrap(), "4");
        assert_eq!(usage(&pool, &key).await, (0, 1));
    }
}
