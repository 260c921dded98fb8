//! 会话管理器
//!
//! 唯一读写凭据字段（密码哈希、刷新令牌哈希与过期时间）的组件。
//! 刷新令牌状态机：`NONE -> ACTIVE`（注册、登录、轮换）`-> NONE`（登出、
//! 过期被发现、被轮换取代）。每个用户同一时刻最多一个有效刷新令牌。

use std::sync::Arc;

use chrono::Duration;
use config::{JwtConfig, SessionConfig};
use domain::{
    ensure_refresh_write, Credentials, DomainError, PasswordHash, RefreshCredential,
    RepositoryError, Timestamp, User, UserEmail, UserId,
};
use ring::rand::SystemRandom;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    clock::Clock,
    error::ApplicationError,
    password::{password_fits, PasswordHasher, MAX_PASSWORD_BYTES},
    repository::{CredentialRepository, StoreTransaction, TransactionManager},
    tokens::{
        generate_refresh_token, hash_refresh_token, AccessToken, JwtService, Principal,
        RefreshToken,
    },
};

/// 一次成功认证后交给客户端的令牌。
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub refresh_expires_at: Timestamp,
}

pub struct SessionManagerDependencies {
    pub store: Arc<dyn TransactionManager>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct SessionManager {
    deps: SessionManagerDependencies,
    jwt: JwtService,
    refresh_ttl: Duration,
    rng: SystemRandom,
    // 未知邮箱登录时用于比对的哈希，使耗时与真实用户一致
    dummy_hash: OnceCell<PasswordHash>,
}

impl SessionManager {
    pub fn new(
        deps: SessionManagerDependencies,
        jwt_config: &JwtConfig,
        session_config: &SessionConfig,
    ) -> Self {
        Self {
            deps,
            jwt: JwtService::new(jwt_config),
            refresh_ttl: Duration::days(session_config.refresh_token_ttl_days),
            rng: SystemRandom::new(),
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// 超过 `MAX_PASSWORD_BYTES` 字节的密码直接拒绝，不做截断。
    pub async fn hash_password(&self, plaintext: &str) -> Result<PasswordHash, ApplicationError> {
        if !password_fits(plaintext) {
            return Err(DomainError::invalid_argument(
                "password",
                format!("must be at most {MAX_PASSWORD_BYTES} bytes"),
            )
            .into());
        }
        Ok(self.deps.password_hasher.hash(plaintext).await?)
    }

    pub async fn verify_password(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, ApplicationError> {
        if !password_fits(plaintext) {
            return Ok(false);
        }
        Ok(self.deps.password_hasher.verify(plaintext, hashed).await?)
    }

    pub fn issue_access_token(
        &self,
        user_id: UserId,
        email: &UserEmail,
    ) -> Result<AccessToken, ApplicationError> {
        self.jwt.issue(user_id, email, self.deps.clock.now())
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Principal, ApplicationError> {
        self.jwt.verify(token, self.deps.clock.now())
    }

    pub fn issue_refresh_token(&self) -> Result<RefreshToken, ApplicationError> {
        generate_refresh_token(&self.rng)
    }

    /// 在调用方的事务中创建账号并开启会话。密码哈希必须在事务打开前算好。
    pub async fn enroll(
        &self,
        tx: &mut dyn StoreTransaction,
        user: &User,
        password: &PasswordHash,
    ) -> Result<SessionTokens, ApplicationError> {
        tx.create_account(user, password)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => DomainError::UserAlreadyExists.into(),
                other => ApplicationError::from(other),
            })?;
        self.start_session(tx, user.id, &user.email).await
    }

    /// 签发新的刷新令牌（覆盖旧值）和访问令牌。
    pub async fn start_session(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: UserId,
        email: &UserEmail,
    ) -> Result<SessionTokens, ApplicationError> {
        let now = self.deps.clock.now();
        let refresh_token = self.issue_refresh_token()?;
        let credential = RefreshCredential::new(refresh_token.hash()?, now, self.refresh_ttl);

        ensure_refresh_write(Some(&credential), now)?;
        tx.store_refresh_credential(user_id, Some(&credential))
            .await?;

        let access_token = self.jwt.issue(user_id, email, now)?;
        Ok(SessionTokens {
            access_token,
            refresh_token,
            refresh_expires_at: credential.expires_at,
        })
    }

    /// 校验邮箱与密码。未知邮箱与错误密码返回同一个错误，耗时也相同。
    ///
    /// 慢哈希比较在事务之外进行。
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Credentials, ApplicationError> {
        let credentials = match UserEmail::parse(email) {
            Ok(email) => {
                let mut tx = self.deps.store.begin().await?;
                tx.find_credentials_by_email(&email).await?
            }
            Err(_) => None,
        };

        let Some(credentials) = credentials else {
            self.verify_against_dummy(password).await?;
            return Err(ApplicationError::InvalidCredentials);
        };

        if !self.verify_password(password, &credentials.password).await? {
            warn!(user_id = %credentials.user_id, "密码校验失败");
            return Err(ApplicationError::InvalidCredentials);
        }
        Ok(credentials)
    }

    async fn verify_against_dummy(&self, password: &str) -> Result<(), ApplicationError> {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.deps.password_hasher.hash("timing-equalisation-only"))
            .await?;
        self.deps.password_hasher.verify(password, dummy).await?;
        Ok(())
    }

    /// 刷新令牌轮换。
    ///
    /// 读取、过期判断与写入新哈希在同一事务内完成；旧令牌在成功后立即失效。
    /// 过期的令牌会被顺带清除，然后返回 `TokenExpired`。
    pub async fn rotate_refresh_token(
        &self,
        presented: &str,
    ) -> Result<SessionTokens, ApplicationError> {
        if presented.trim().is_empty() {
            return Err(ApplicationError::TokenInvalid);
        }
        let hash = hash_refresh_token(presented)?;
        let now = self.deps.clock.now();

        let mut tx = self.deps.store.begin().await?;
        let credentials = match tx.find_credentials_by_refresh_hash(&hash).await? {
            Some(credentials) => credentials,
            None => {
                warn!("未知的刷新令牌");
                return Err(ApplicationError::RefreshTokenNotFound);
            }
        };
        let current = credentials
            .refresh
            .as_ref()
            .ok_or(ApplicationError::RefreshTokenNotFound)?;

        if current.is_expired(now) {
            self.clear_refresh(&mut *tx, credentials.user_id, now)
                .await?;
            tx.commit().await?;
            warn!(user_id = %credentials.user_id, "刷新令牌已过期，已清除");
            return Err(ApplicationError::TokenExpired);
        }

        let tokens = self
            .start_session(&mut *tx, credentials.user_id, &credentials.email)
            .await?;
        tx.commit().await?;

        info!(user_id = %credentials.user_id, "刷新令牌已轮换");
        Ok(tokens)
    }

    /// 登出时吊销刷新令牌。未知或已吊销的令牌不算错误。
    pub async fn revoke_refresh_token(&self, presented: &str) -> Result<(), ApplicationError> {
        if presented.trim().is_empty() {
            return Ok(());
        }
        let hash = hash_refresh_token(presented)?;

        let mut tx = self.deps.store.begin().await?;
        ensure_refresh_write(None, self.deps.clock.now())?;
        let cleared = tx.clear_refresh_by_hash(&hash).await?;
        tx.commit().await?;

        if cleared {
            info!("刷新令牌已吊销");
        }
        Ok(())
    }

    async fn clear_refresh(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<(), ApplicationError> {
        ensure_refresh_write(None, now)?;
        tx.store_refresh_credential(user_id, None).await?;
        Ok(())
    }
}
