use std::sync::Arc;

use application::{
    AvatarStorage, AvatarStorageError, ImageFormat, MembershipAuthorizer, MemoryStore,
    MessageService, MessageServiceDependencies, RoomService, RoomServiceDependencies,
    SessionManager, SessionManagerDependencies, SystemClock, UserService,
    UserServiceDependencies,
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use config::AppConfig;
use infrastructure::BcryptPasswordHasher;
use serde_json::Value;
use tower::ServiceExt;
use web_api::{router, AppState};

pub struct StubAvatarStorage;

#[async_trait]
impl AvatarStorage for StubAvatarStorage {
    async fn store(&self, bytes: &[u8], format: ImageFormat) -> Result<String, AvatarStorageError> {
        Ok(format!(
            "https://cdn.test/avatars/{}.{}",
            bytes.len(),
            format.extension()
        ))
    }
}

pub fn build_router() -> Router {
    build_router_with_store().0
}

/// 同时返回底层存储，便于测试注入存储故障。
pub fn build_router_with_store() -> (Router, MemoryStore) {
    let mut config = AppConfig::default();
    config.jwt.secret = "http-test-signing-key-0123456789abcdef".to_string();

    let handle = MemoryStore::new();
    let store = Arc::new(handle.clone());
    let clock = Arc::new(SystemClock);
    let session = Arc::new(SessionManager::new(
        SessionManagerDependencies {
            store: store.clone(),
            password_hasher: Arc::new(BcryptPasswordHasher::new(Some(4))),
            clock: clock.clone(),
        },
        &config.jwt,
        &config.session,
    ));
    let authorizer = Arc::new(MembershipAuthorizer::new(clock.clone()));

    let users = Arc::new(UserService::new(
        UserServiceDependencies {
            store: store.clone(),
            session: session.clone(),
            avatar_storage: Arc::new(StubAvatarStorage),
            clock: clock.clone(),
        },
        &config.avatar,
    ));
    let rooms = Arc::new(RoomService::new(
        RoomServiceDependencies {
            store: store.clone(),
            authorizer: authorizer.clone(),
            clock: clock.clone(),
        },
        &config.messaging,
    ));
    let messages = Arc::new(MessageService::new(
        MessageServiceDependencies {
            store,
            authorizer,
            clock,
        },
        &config.messaging,
    ));

    let app = router(AppState::new(users, rooms, messages, session, &config));
    (app, handle)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// 响应里 `Set-Cookie` 的 `name=value` 部分。
    pub fn cookie_pair(&self, name: &str) -> Option<String> {
        self.set_cookie(name)
            .and_then(|raw| raw.split(';').next().map(str::to_owned))
    }

    pub fn set_cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(&format!("{name}=")))
            .map(str::to_owned)
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.expect("router responds");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

pub fn cookie_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("request")
}

/// 注册并返回 (访问令牌, 用户 id, 刷新 Cookie)。
pub async fn register(app: &Router, name: &str, email: &str) -> (String, String, String) {
    let response = send(
        app,
        json_request(
            "POST",
            "/auth/register",
            None,
            serde_json::json!({ "name": name, "email": email, "password": "Passw0rd1" }),
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    let cookie = response
        .cookie_pair("refresh_token")
        .expect("refresh cookie");
    (
        response.body["token"].as_str().expect("token").to_owned(),
        response.body["user"]["id"].as_str().expect("id").to_owned(),
        cookie,
    )
}
