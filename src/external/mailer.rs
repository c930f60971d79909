use futures_util::future::BoxFuture;

use crate::error::AppResult;
use crate::services::Mailer;

/// 未接入邮件服务时的投递实现：验证码只写入日志
#[derive(Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_otp<'a>(
        &'a self,
        email: &'a str,
        name: &'a str,
        otp: &'a str,
    ) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            log::info!("Password reset code for {} <{}>: {}", name, email, otp);
            Ok(())
        })
    }
}
