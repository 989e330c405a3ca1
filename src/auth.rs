//! Basic 认证：凭据存储与请求拦截。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::{HeaderMap, Request};
use axum::middleware;
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::http::resolve_client_ip;

/// 启动时确定的单一用户名/密码对。
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug)]
pub struct AuthConfig {
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny,
}

impl AuthConfig {
    pub fn new(credential: Option<Credential>) -> Self {
        Self { credential }
    }

    pub fn is_enabled(&self) -> bool {
        self.credential.is_some()
    }

    /// 校验 `Authorization: Basic` 头；未配置凭据时一律放行。
    pub fn authenticate(&self, headers: &HeaderMap) -> AuthDecision {
        let Some(expected) = &self.credential else {
            return AuthDecision::Allow;
        };
        match headers.typed_get::<Authorization<Basic>>() {
            Some(Authorization(basic))
                if basic.username() == expected.username
                    && basic.password() == expected.password =>
            {
                AuthDecision::Allow
            }
            _ => AuthDecision::Deny,
        }
    }
}

/// 认证中间件：拒绝时直接返回 401，后续处理器不再执行。
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    if auth.authenticate(req.headers()) == AuthDecision::Allow {
        return Ok(next.run(req).await);
    }

    let connect_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    match resolve_client_ip(req.headers(), connect_ip) {
        Some(ip) => warn!(client_ip = %ip, path = req.uri().path(), "authentication failed"),
        None => warn!(path = req.uri().path(), "authentication failed"),
    }
    Err(ApiError::Unauthorized)
}
