//! Bearer 认证中间件。
//!
//! 校验通过后把 [`AuthUser`] 放进请求扩展，受保护的处理函数用 `Extension<AuthUser>` 取出。

use application::{dto::UserDto, Principal};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use domain::{Timestamp, UserId};
use serde::Serialize;

use crate::{error::ApiError, state::AppState};

/// 已认证的调用者。
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: String,
}

impl From<Principal> for AuthUser {
    fn from(principal: Principal) -> Self {
        Self {
            user_id: principal.user_id,
            email: principal.email,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or_else(ApiError::invalid_token)?;
    let principal = state.session.verify_access_token(token).map_err(|err| {
        tracing::debug!(error = %err, "访问令牌校验失败");
        ApiError::invalid_token()
    })?;

    request.extensions_mut().insert(AuthUser::from(principal));
    Ok(next.run(request).await)
}

/// 注册与登录的响应体。刷新令牌只在 Cookie 里。
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserDto>,
}
