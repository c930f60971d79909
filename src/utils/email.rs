use crate::error::{AppError, AppResult};
use regex::Regex;

/// 邮箱格式校验（宽松），统一转小写
pub fn normalize_email(email: &str) -> AppResult<String> {
    let email_regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .map_err(|e| AppError::InternalError(format!("Invalid email regex: {e}")))?;

    let email = email.trim().to_lowercase();
    if email.len() > 254 || !email_regex.is_match(&email) {
        return Err(AppError::ValidationError("Invalid email address".to_string()));
    }

    Ok(email)
}
