use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 请求体上限（音频以 base64 传入，需要放宽）
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expires_in: i64,  // seconds
    pub refresh_token_expires_in: i64, // seconds
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub transcription_model: String,
    pub chat_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            transcription_model: "whisper-1".to_string(),
            chat_model: "gpt-4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StripeConfig {
    pub secret_key: String,
}

/// Quota metering settings shared by the rate-limit middleware and service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub api_key_header: String,
    /// Fallback: regex whose first capture group is the API key in the request path.
    pub url_pattern: String,
    /// Free-package ceilings per client IP per UTC day.
    pub ip_daily_audio_limit: u32,
    pub ip_daily_text_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api_key_header: "X-API-Key".to_string(),
            url_pattern: r"^/api/soapnotes/([^/]+)".to_string(),
            ip_daily_audio_limit: 5,
            ip_daily_text_limit: 10,
        }
    }
}

fn default_max_body_bytes() -> usize {
    // 100MB 音频 base64 后约 134MB
    140 * 1024 * 1024
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 配置文件不存在时完全依赖环境变量
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => toml::from_str(&config_str)
                .map_err(|e| format!("Failed to parse config file: {e}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let database_url = get_env("DATABASE_URL")
                    .ok_or("DATABASE_URL is not set and config.toml was not found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                        max_body_bytes: get_env_parse("SERVER_MAX_BODY_BYTES", default_max_body_bytes()),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                        access_token_expires_in: get_env_parse("JWT_ACCESS_EXPIRES_IN", 2_592_000i64),
                        refresh_token_expires_in: get_env_parse(
                            "JWT_REFRESH_EXPIRES_IN",
                            2_592_000i64,
                        ),
                    },
                    openai: OpenAiConfig::default(),
                    stripe: StripeConfig::default(),
                    rate_limit: RateLimitConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) {
        if let Some(v) = get_env("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(p) = get_env("SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = p;
        }
        if let Some(n) = get_env("SERVER_MAX_BODY_BYTES").and_then(|v| v.parse().ok()) {
            self.server.max_body_bytes = n;
        }
        if let Some(v) = get_env("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(mc) = get_env("DB_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.database.max_connections = mc;
        }
        if let Some(v) = get_env("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Some(n) = get_env("JWT_ACCESS_EXPIRES_IN").and_then(|v| v.parse().ok()) {
            self.jwt.access_token_expires_in = n;
        }
        if let Some(n) = get_env("JWT_REFRESH_EXPIRES_IN").and_then(|v| v.parse().ok()) {
            self.jwt.refresh_token_expires_in = n;
        }
        if let Some(v) = get_env("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = get_env("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = get_env("OPENAI_TRANSCRIPTION_MODEL") {
            self.openai.transcription_model = v;
        }
        if let Some(v) = get_env("OPENAI_CHAT_MODEL") {
            self.openai.chat_model = v;
        }
        if let Some(v) = get_env("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = v;
        }
        if let Some(v) = get_env("RATE_LIMIT_API_KEY_HEADER") {
            self.rate_limit.api_key_header = v;
        }
        if let Some(v) = get_env("RATE_LIMIT_URL_PATTERN") {
            self.rate_limit.url_pattern = v;
        }
        if let Some(n) = get_env("RATE_LIMIT_IP_DAILY_AUDIO").and_then(|v| v.parse().ok()) {
            self.rate_limit.ip_daily_audio_limit = n;
        }
        if let Some(n) = get_env("RATE_LIMIT_IP_DAILY_TEXT").and_then(|v| v.parse().ok()) {
            self.rate_limit.ip_daily_text_limit = n;
        }
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_toml_uses_section_defaults() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            url = "postgres://localhost/soapnotes"
            max_connections = 5

            [jwt]
            secret = "s3cret"
            access_token_expires_in = 3600
            refresh_token_expires_in = 86400
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_body_bytes, default_max_body_bytes());
        assert_eq!(config.rate_limit.api_key_header, "X-API-Key");
        assert_eq!(config.rate_limit.ip_daily_audio_limit, 5);
        assert_eq!(config.openai.transcription_model, "whisper-1");
        assert!(config.stripe.secret_key.is_empty());
    }

    #[test]
    fn test_parse_rate_limit_section() {
        let raw = r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [database]
            url = "sqlite::memory:"
            max_connections = 1

            [jwt]
            secret = "x"
            access_token_expires_in = 1
            refresh_token_expires_in = 1

            [rate_limit]
            api_key_header = "X-Key"
            url_pattern = "^/v2/notes/([^/]+)"
            ip_daily_audio_limit = 2
            ip_daily_text_limit = 4
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.rate_limit.api_key_header, "X-Key");
        assert_eq!(config.rate_limit.ip_daily_text_limit, 4);
    }
}
