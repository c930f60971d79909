use actix_cors::Cors;

use super::rate_limiter::{
    HEADER_AUDIO_DURATION, HEADER_AUDIO_REMAINING, HEADER_IP_AUDIO_REMAINING,
    HEADER_IP_TEXT_REMAINING, HEADER_RESET, HEADER_TEXT_REMAINING,
};

/// API key 通过自定义 header 传入；配额响应头需要暴露给浏览器
pub fn create_cors(api_key_header: &str) -> Cors {
    let exposed = [
        HEADER_AUDIO_REMAINING,
        HEADER_TEXT_REMAINING,
        HEADER_AUDIO_DURATION,
        HEADER_RESET,
        HEADER_IP_AUDIO_REMAINING,
        HEADER_IP_TEXT_REMAINING,
    ];

    Cors::default()
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_any_header()
        .expose_headers(
            std::iter::once(api_key_header.to_string())
                .chain(exposed.iter().map(|h| h.to_string())),
        )
        .supports_credentials()
        .max_age(3600)
}
