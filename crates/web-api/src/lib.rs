//! Web API 层。
//!
//! 提供 Axum 路由，把 HTTP 请求委托给应用层的用例服务；
//! 访问令牌走 `Authorization` 头，刷新令牌只走 HttpOnly Cookie。

mod auth;
mod cookie;
mod error;
mod extract;
mod routes;
mod state;

pub use auth::{require_auth, AuthResponse, AuthUser};
pub use cookie::RefreshCookie;
pub use error::{ApiError, ErrorBody};
pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use routes::router;
pub use state::AppState;
