use std::sync::Arc;

use config::AvatarConfig;
use domain::{DisplayName, DomainError, ProfileUpdate, User, UserEmail, UserId};
use tracing::info;
use uuid::Uuid;

use crate::{
    avatar::{AvatarStorage, ImageFormat},
    clock::Clock,
    error::ApplicationError,
    repository::{TransactionManager, UserRepository},
    services::session_manager::{SessionManager, SessionTokens},
};

const DEFAULT_SEARCH_LIMIT: u32 = 10;
const MAX_SEARCH_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub email: String,
    pub password: String,
}

/// 注册或登录成功后的结果。
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    pub tokens: SessionTokens,
}

#[derive(Debug, Clone)]
pub struct UserSearchResult {
    pub users: Vec<User>,
    pub total: u64,
}

pub struct UserServiceDependencies {
    pub store: Arc<dyn TransactionManager>,
    pub session: Arc<SessionManager>,
    pub avatar_storage: Arc<dyn AvatarStorage>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
    max_avatar_bytes: usize,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies, avatar: &AvatarConfig) -> Self {
        Self {
            deps,
            max_avatar_bytes: avatar.max_bytes,
        }
    }

    pub async fn register(
        &self,
        request: RegisterUserRequest,
    ) -> Result<AuthOutcome, ApplicationError> {
        let name = DisplayName::parse(request.name)?;
        let email = UserEmail::parse(request.email)?;
        if request.password.is_empty() {
            return Err(DomainError::invalid_argument("password", "cannot be empty").into());
        }

        // 慢哈希在事务外完成
        let password_hash = self.deps.session.hash_password(&request.password).await?;

        let user = User::register(
            UserId::from(Uuid::new_v4()),
            name,
            email,
            self.deps.clock.now(),
        );

        let mut tx = self.deps.store.begin().await?;
        let tokens = self
            .deps
            .session
            .enroll(&mut *tx, &user, &password_hash)
            .await?;
        tx.commit().await?;

        info!(user_id = %user.id, "用户注册成功");
        Ok(AuthOutcome { user, tokens })
    }

    pub async fn login(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<AuthOutcome, ApplicationError> {
        let credentials = self
            .deps
            .session
            .authenticate(&request.email, &request.password)
            .await?;

        let mut tx = self.deps.store.begin().await?;
        let user = tx
            .find_user_by_id(credentials.user_id)
            .await?
            .ok_or(ApplicationError::InvalidCredentials)?;
        let tokens = self
            .deps
            .session
            .start_session(&mut *tx, user.id, &user.email)
            .await?;
        tx.commit().await?;

        info!(user_id = %user.id, "用户登录成功");
        Ok(AuthOutcome { user, tokens })
    }

    /// 有刷新令牌就吊销，没有也视为成功。
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ApplicationError> {
        if let Some(token) = refresh_token {
            self.deps.session.revoke_refresh_token(token).await?;
        }
        Ok(())
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, ApplicationError> {
        self.deps.session.rotate_refresh_token(refresh_token).await
    }

    pub async fn get_profile(&self, user_id: UserId) -> Result<User, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        Ok(tx
            .find_user_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?)
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> Result<User, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let mut user = tx
            .find_user_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        if update.is_empty() {
            return Ok(user);
        }

        user.apply_update(update, self.deps.clock.now())?;
        tx.update_profile(&user).await?;
        tx.commit().await?;

        info!(user_id = %user_id, "用户资料已更新");
        Ok(user)
    }

    /// 名称或邮箱的子串搜索，大小写不敏感。
    pub async fn search_users(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> Result<UserSearchResult, ApplicationError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DomainError::invalid_argument("query", "cannot be empty").into());
        }
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if limit == 0 || limit > MAX_SEARCH_LIMIT {
            return Err(DomainError::invalid_argument(
                "limit",
                format!("must be between 1 and {}", MAX_SEARCH_LIMIT),
            )
            .into());
        }

        let mut tx = self.deps.store.begin().await?;
        let (users, total) = tx.search_users(query, limit).await?;
        Ok(UserSearchResult { users, total })
    }

    /// 校验图片格式与大小，存储后把 URL 写回用户资料。
    pub async fn upload_avatar(
        &self,
        user_id: UserId,
        bytes: &[u8],
    ) -> Result<User, ApplicationError> {
        if bytes.is_empty() {
            return Err(DomainError::invalid_argument("avatar", "file is empty").into());
        }
        if bytes.len() > self.max_avatar_bytes {
            return Err(DomainError::invalid_argument(
                "avatar",
                format!("file exceeds {} bytes", self.max_avatar_bytes),
            )
            .into());
        }
        let format = ImageFormat::sniff(bytes).ok_or_else(|| {
            DomainError::invalid_argument("avatar", "only JPEG, PNG, GIF and WebP are allowed")
        })?;

        let url = self
            .deps
            .avatar_storage
            .store(bytes, format)
            .await
            .map_err(|err| ApplicationError::infrastructure(err.to_string()))?;

        let mut tx = self.deps.store.begin().await?;
        let mut user = tx
            .find_user_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;
        user.set_profile_image(url, self.deps.clock.now());
        tx.update_profile(&user).await?;
        tx.commit().await?;

        info!(user_id = %user_id, format = format.extension(), "头像已更新");
        Ok(user)
    }
}
