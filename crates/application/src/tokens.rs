//! 访问令牌（HS256 JWT）与刷新令牌的生成、签发和校验。

use std::fmt;

use chrono::Duration;
use config::JwtConfig;
use data_encoding::BASE64URL_NOPAD;
use domain::{DomainError, RefreshTokenHash, Timestamp, UserEmail, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApplicationError;

/// 刷新令牌的随机字节数（256 位）。
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// JWT 载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// 经过验证的访问令牌持有者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Timestamp,
}

/// 刷新令牌明文。只交给客户端，`Debug` 不输出内容。
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> Result<RefreshTokenHash, DomainError> {
        hash_refresh_token(&self.0)
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(..)")
    }
}

/// 刷新令牌的 SHA-256 摘要，服务端只保存这个值。
pub fn hash_refresh_token(plaintext: &str) -> Result<RefreshTokenHash, DomainError> {
    let digest = digest::digest(&digest::SHA256, plaintext.as_bytes());
    RefreshTokenHash::from_bytes(digest.as_ref())
}

/// 生成 256 位随机刷新令牌，URL 安全的 base64 编码。
pub fn generate_refresh_token(rng: &SystemRandom) -> Result<RefreshToken, ApplicationError> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| ApplicationError::infrastructure("system randomness unavailable"))?;
    Ok(RefreshToken(BASE64URL_NOPAD.encode(&bytes)))
}

/// HS256 签发与校验。密钥在构造时读入一次。
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
    leeway_seconds: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            ttl: Duration::seconds(config.access_token_ttl_seconds),
            leeway_seconds: i64::try_from(config.leeway_seconds).unwrap_or(i64::MAX),
        }
    }

    pub fn issue(
        &self,
        user_id: UserId,
        email: &UserEmail,
        now: Timestamp,
    ) -> Result<AccessToken, ApplicationError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            user_id: user_id.into(),
            email: email.as_str().to_owned(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| ApplicationError::infrastructure(format!("jwt encode: {err}")))?;
        Ok(AccessToken { token, expires_at })
    }

    /// 签名、签发者与过期时间都必须有效，任何失败都只返回 `TokenInvalid`。
    ///
    /// 过期按传入的 `now` 判断，允许 `leeway_seconds` 的时钟偏差。
    pub fn verify(&self, token: &str, now: Timestamp) -> Result<Principal, ApplicationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| ApplicationError::TokenInvalid)?;
        let claims = data.claims;

        if claims.exp.saturating_add(self.leeway_seconds) < now.timestamp() {
            return Err(ApplicationError::TokenInvalid);
        }

        Ok(Principal {
            user_id: UserId::from(claims.user_id),
            email: claims.email,
        })
    }
}
