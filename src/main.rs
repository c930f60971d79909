use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use soapnote_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{LogMailer, OpenAiService, StripeService},
    handlers,
    middlewares::{AuthMiddleware, RateLimitMiddleware, create_cors},
    services::*,
    swagger::swagger_config,
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml().expect("Failed to load configuration file");

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .expect("Failed to create database connection pool");

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    // 套餐目录
    let package_service = PackageService::new(pool.clone());
    package_service
        .seed_defaults()
        .await
        .expect("Failed to seed package catalog");

    let jwt_service = JwtService::new(
        &config.jwt.secret,
        config.jwt.access_token_expires_in,
        config.jwt.refresh_token_expires_in,
    );

    if config.openai.api_key.is_empty() {
        log::warn!("OPENAI_API_KEY is not set, SOAP note generation will fail");
    }
    if config.stripe.secret_key.is_empty() {
        log::warn!("STRIPE_SECRET_KEY is not set, payments will fail");
    }

    // 外部服务
    let generator: Arc<dyn NoteGenerator> = Arc::new(OpenAiService::new(config.openai.clone()));
    let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeService::new(config.stripe.clone()));
    // 未接入邮件服务，重置密码验证码写入日志
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);

    // 业务服务
    let auth_service = AuthService::new(pool.clone(), jwt_service.clone(), mailer);
    let api_key_service = ApiKeyService::new(pool.clone());
    let soap_note_service = SoapNoteService::new(pool.clone(), generator);
    let payment_service = PaymentService::new(pool.clone(), gateway);
    let rate_limit_service = RateLimitService::new(pool.clone(), config.rate_limit.clone());

    let limiter =
        RateLimitMiddleware::new(rate_limit_service).expect("Invalid rate limit configuration");

    let max_body_bytes = config.server.max_body_bytes;
    let api_key_header = config.rate_limit.api_key_header.clone();

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        let limiter = limiter.clone();
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors(&api_key_header))
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .app_data(web::JsonConfig::default().limit(max_body_bytes))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(package_service.clone()))
            .app_data(web::Data::new(api_key_service.clone()))
            .app_data(web::Data::new(soap_note_service.clone()))
            .app_data(web::Data::new(payment_service.clone()))
            .configure(swagger_config)
            .service(
                web::scope("/api")
                    .configure(handlers::auth_config)
                    .configure(handlers::package_config)
                    .configure(handlers::usage_config)
                    .configure(|cfg| handlers::soap_note_config(cfg, limiter))
                    .configure(handlers::payment_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
