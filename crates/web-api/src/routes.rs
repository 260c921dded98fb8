use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use application::{
    dto::{
        MemberDto, MessageDto, MessageListDto, RoomDetailsDto, RoomListDto, UserDto,
        UserSearchDto,
    },
    password_fits, AuthenticateUserRequest, CreateRoomRequest, ListMessagesQuery,
    RegisterUserRequest, SendMessageRequest, SessionTokens,
};
use domain::{
    DisplayName, MessageCursor, MessageId, Patch, ProfileUpdate, RoomId, RoomUpdate, UserId,
};

use crate::{
    auth::{require_auth, AuthResponse, AuthUser},
    error::ApiError,
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
};

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 2, max = 50))]
    name: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8), custom(function = "password_within_byte_limit"))]
    password: String,
}

/// `length` 按字符计数，密码上限按字节计。
fn password_within_byte_limit(password: &str) -> Result<(), ValidationError> {
    if password_fits(password) {
        Ok(())
    } else {
        Err(ValidationError::new("password_too_long"))
    }
}

#[derive(Debug, Deserialize, Validate)]
struct LoginPayload {
    #[validate(email)]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize)]
struct UpdateProfilePayload {
    #[serde(default)]
    name: Patch<String>,
    #[serde(default)]
    bio: Patch<String>,
    #[serde(default)]
    profile_image_url: Patch<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateRoomPayload {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[serde(default = "default_group_chat")]
    is_group_chat: bool,
    #[serde(default)]
    member_ids: Vec<Uuid>,
}

fn default_group_chat() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RoomListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct UpdateRoomPayload {
    #[serde(default)]
    name: Patch<String>,
}

#[derive(Debug, Deserialize)]
struct AddMemberPayload {
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
    file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    before: Option<String>,
    page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EditMessagePayload {
    content: String,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth_routes())
        .nest("/api", protected_routes(&state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
}

fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .route("/users/search", get(search_users))
        .route(
            "/avatar/upload",
            post(upload_avatar).layer(DefaultBodyLimit::max(state.avatar_max_bytes)),
        )
        .route("/chatrooms", post(create_room).get(list_rooms))
        .route("/chatrooms/{room_id}", get(get_room).put(update_room))
        .route("/chatrooms/{room_id}/members", post(add_member))
        .route(
            "/chatrooms/{room_id}/members/{user_id}",
            delete(remove_member),
        )
        .route(
            "/chatrooms/{room_id}/messages",
            post(send_message).get(list_messages),
        )
        .route(
            "/messages/{message_id}",
            get(get_message).put(edit_message).delete(delete_message),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn auth_response(tokens: &SessionTokens, user: Option<UserDto>) -> AuthResponse {
    AuthResponse {
        token: tokens.access_token.token.clone(),
        expires_at: tokens.access_token.expires_at,
        user,
    }
}

async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(payload): ApiJson<RegisterPayload>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    payload.validate().map_err(ApiError::validation)?;

    let outcome = state
        .users
        .register(RegisterUserRequest {
            name: payload.name,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let jar = state
        .refresh_cookie
        .set(jar, outcome.tokens.refresh_token.as_str());
    let body = auth_response(&outcome.tokens, Some(UserDto::from(&outcome.user)));
    Ok((StatusCode::CREATED, jar, Json(body)))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(payload): ApiJson<LoginPayload>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    payload.validate().map_err(ApiError::validation)?;

    let outcome = state
        .users
        .login(AuthenticateUserRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let jar = state
        .refresh_cookie
        .set(jar, outcome.tokens.refresh_token.as_str());
    let body = auth_response(&outcome.tokens, Some(UserDto::from(&outcome.user)));
    Ok((jar, Json(body)))
}

/// 无论服务端撤销是否成功，响应里都带上清除 Cookie。
async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), (CookieJar, ApiError)> {
    let presented = state.refresh_cookie.read(&jar);
    let jar = state.refresh_cookie.clear(jar);

    match state.users.logout(presented.as_deref()).await {
        Ok(()) => Ok((jar, Json(json!({ "message": "logged out" })))),
        Err(err) => Err((jar, ApiError::from(err))),
    }
}

/// 轮换失败时顺带清掉客户端的旧 Cookie。
async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AuthResponse>), (CookieJar, ApiError)> {
    let presented = state.refresh_cookie.read(&jar).unwrap_or_default();

    match state.users.refresh(&presented).await {
        Ok(tokens) => {
            let jar = state.refresh_cookie.set(jar, tokens.refresh_token.as_str());
            Ok((jar, Json(auth_response(&tokens, None))))
        }
        Err(err) => Err((state.refresh_cookie.clear(jar), ApiError::from(err))),
    }
}

async fn get_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserDto>, ApiError> {
    let user = state.users.get_profile(auth.user_id).await?;
    Ok(Json(UserDto::from(&user)))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(payload): ApiJson<UpdateProfilePayload>,
) -> Result<Json<UserDto>, ApiError> {
    let update = ProfileUpdate {
        name: payload.name.try_map(DisplayName::parse)?,
        bio: payload.bio,
        profile_image_url: payload.profile_image_url,
    };
    let user = state.users.update_profile(auth.user_id, update).await?;
    Ok(Json(UserDto::from(&user)))
}

async fn search_users(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<UserSearchDto>, ApiError> {
    let result = state.users.search_users(&query.query, query.limit).await?;
    Ok(Json(UserSearchDto::from(&result)))
}

async fn upload_avatar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<UserDto>, ApiError> {
    let user = state.users.upload_avatar(auth.user_id, &body).await?;
    Ok(Json(UserDto::from(&user)))
}

async fn create_room(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(payload): ApiJson<CreateRoomPayload>,
) -> Result<(StatusCode, Json<RoomDetailsDto>), ApiError> {
    payload.validate().map_err(ApiError::validation)?;

    let details = state
        .rooms
        .create_room(CreateRoomRequest {
            creator_id: auth.user_id,
            name: payload.name,
            is_group_chat: payload.is_group_chat,
            member_ids: payload.member_ids.into_iter().map(UserId::from).collect(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(RoomDetailsDto::from(&details))))
}

async fn list_rooms(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<RoomListQuery>,
) -> Result<Json<RoomListDto>, ApiError> {
    let page = state
        .rooms
        .list_rooms(auth.user_id, query.page, query.page_size)
        .await?;
    Ok(Json(RoomListDto::from(&page)))
}

async fn get_room(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(room_id): ApiPath<Uuid>,
) -> Result<Json<RoomDetailsDto>, ApiError> {
    let details = state
        .rooms
        .get_room(RoomId::from(room_id), auth.user_id)
        .await?;
    Ok(Json(RoomDetailsDto::from(&details)))
}

async fn update_room(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(room_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateRoomPayload>,
) -> Result<Json<RoomDetailsDto>, ApiError> {
    let details = state
        .rooms
        .update_room(
            RoomId::from(room_id),
            auth.user_id,
            RoomUpdate { name: payload.name },
        )
        .await?;
    Ok(Json(RoomDetailsDto::from(&details)))
}

async fn add_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(room_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<AddMemberPayload>,
) -> Result<(StatusCode, Json<MemberDto>), ApiError> {
    let member = state
        .rooms
        .add_member(
            RoomId::from(room_id),
            auth.user_id,
            UserId::from(payload.user_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(MemberDto::from(&member))))
}

async fn remove_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath((room_id, user_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .rooms
        .remove_member(RoomId::from(room_id), auth.user_id, UserId::from(user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(room_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    let message = state
        .messages
        .send_message(SendMessageRequest {
            room_id: RoomId::from(room_id),
            sender_id: auth.user_id,
            content: payload.content,
            attachment_url: payload.file_url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(MessageDto::from(&message))))
}

/// `before` 接受上一页返回的 `next_before`，也接受单独的 RFC 3339 时间。
fn parse_before(raw: Option<&str>) -> Result<Option<MessageCursor>, ApiError> {
    raw.map(|value| {
        value.parse::<MessageCursor>().map_err(|_| {
            ApiError::bad_request("`before` must be a page cursor or an RFC 3339 timestamp")
        })
    })
    .transpose()
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(room_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<MessageListDto>, ApiError> {
    let before = parse_before(query.before.as_deref())?;
    let page = state
        .messages
        .list_messages(ListMessagesQuery {
            room_id: RoomId::from(room_id),
            requester_id: auth.user_id,
            before,
            page_size: query.page_size,
        })
        .await?;
    Ok(Json(MessageListDto::from(&page)))
}

async fn get_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(message_id): ApiPath<Uuid>,
) -> Result<Json<MessageDto>, ApiError> {
    let message = state
        .messages
        .get_message(MessageId::from(message_id), auth.user_id)
        .await?;
    Ok(Json(MessageDto::from(&message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(message_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<EditMessagePayload>,
) -> Result<Json<MessageDto>, ApiError> {
    let message = state
        .messages
        .edit_message(MessageId::from(message_id), auth.user_id, payload.content)
        .await?;
    Ok(Json(MessageDto::from(&message)))
}

async fn delete_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(message_id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .messages
        .delete_message(MessageId::from(message_id), auth.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
