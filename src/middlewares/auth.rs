use crate::error::{AppError, AppResult};
use crate::utils::JwtService;
use actix_web::http::Method;
use actix_web::{
    Error, HttpMessage, HttpRequest,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};

/// JWT 校验通过后放入 request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub role: String,
}

// 公开路径配置
struct PublicPaths {
    exact_paths: Vec<&'static str>,
    prefix_paths: Vec<&'static str>,
    // 仅对指定方法公开（由 API key 计量，不走 JWT）
    method_prefix_paths: Vec<(Method, &'static str)>,
    excluded_paths: Vec<&'static str>,
}

impl PublicPaths {
    fn new() -> Self {
        Self {
            exact_paths: vec![
                "/swagger-ui",
                "/swagger-ui/",
                "/api-docs/openapi.json",
                "/api/packages",
            ],
            prefix_paths: vec!["/swagger-ui/", "/api-docs/", "/api/auth/", "/api/packages/"],
            method_prefix_paths: vec![(Method::POST, "/api/soapnotes")],
            // 即使在公开前缀下也需要认证
            excluded_paths: vec!["/api/auth/logout", "/api/auth/profile"],
        }
    }

    fn is_public(&self, method: &Method, path: &str) -> bool {
        if self
            .excluded_paths
            .iter()
            .any(|&excluded| path.starts_with(excluded))
        {
            return false;
        }

        if self.exact_paths.contains(&path) {
            return true;
        }

        if self
            .method_prefix_paths
            .iter()
            .any(|(m, prefix)| m == method && path.starts_with(prefix))
        {
            return true;
        }

        self.prefix_paths
            .iter()
            .any(|&prefix| path.starts_with(prefix))
    }
}

pub struct AuthMiddleware {
    jwt_service: JwtService,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self { jwt_service }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service,
            jwt_service: self.jwt_service.clone(),
            public_paths: PublicPaths::new(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
    jwt_service: JwtService,
    public_paths: PublicPaths,
}

impl<S> AuthMiddlewareService<S> {
    fn authenticate(&self, req: &ServiceRequest) -> AppResult<AuthenticatedUser> {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))?;

        let claims = self
            .jwt_service
            .verify_access_token(token)
            .map_err(|_| AppError::AuthError("Invalid access token".to_string()))?;

        Ok(AuthenticatedUser {
            id: claims.user_id()?,
            role: claims.role,
        })
    }
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // 放行所有 CORS 预检请求
        if req.method() == Method::OPTIONS
            || self.public_paths.is_public(req.method(), req.path())
        {
            let fut = self.service.call(req);
            return Box::pin(fut);
        }

        match self.authenticate(&req) {
            Ok(user) => {
                req.extensions_mut().insert(user);
                Box::pin(self.service.call(req))
            }
            Err(error) => Box::pin(async move { Err(error.into()) }),
        }
    }
}

/// 当前登录用户 ID（由 AuthMiddleware 写入）
pub fn current_user_id(req: &HttpRequest) -> AppResult<i32> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.id)
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        let paths = PublicPaths::new();
        assert!(paths.is_public(&Method::POST, "/api/auth/signin"));
        assert!(!paths.is_public(&Method::POST, "/api/auth/logout"));
        assert!(!paths.is_public(&Method::GET, "/api/auth/profile"));
        assert!(paths.is_public(&Method::POST, "/api/auth/forgot-password"));
        assert!(paths.is_public(&Method::POST, "/api/auth/reset-password"));
        assert!(paths.is_public(&Method::GET, "/api/packages"));
        assert!(paths.is_public(&Method::GET, "/api/packages/3/yearly-price"));
        assert!(paths.is_public(&Method::POST, "/api/soapnotes"));
        assert!(paths.is_public(&Method::POST, "/api/soapnotes/abc123"));
        assert!(!paths.is_public(&Method::GET, "/api/soapnotes"));
        assert!(!paths.is_public(&Method::DELETE, "/api/soapnotes/4"));
        assert!(!paths.is_public(&Method::GET, "/api/usage"));
        assert!(paths.is_public(&Method::GET, "/swagger-ui/index.html"));
    }
}
