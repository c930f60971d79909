use rand::Rng;

/// 六位数字验证码，首位不为 0
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}
