//! 凭据记录：密码哈希与可选的刷新令牌哈希。
//!
//! 这些字段只由会话管理器读写。刷新令牌哈希与过期时间必须成对出现，
//! 每个写入点都调用 [`ensure_refresh_write`]，读取时用
//! [`RefreshCredential::from_columns`] 校验存储中的两列。

use chrono::Duration;

use crate::errors::DomainError;
use crate::value_objects::{PasswordHash, RefreshTokenHash, Timestamp, UserEmail, UserId};

/// 服务端保存的刷新令牌状态（哈希 + 绝对过期时间）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCredential {
    pub hash: RefreshTokenHash,
    pub expires_at: Timestamp,
}

impl RefreshCredential {
    pub fn new(hash: RefreshTokenHash, issued_at: Timestamp, ttl: Duration) -> Self {
        Self {
            hash,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// 从两个可空列重建状态，只有一个有值时视为数据损坏。
    pub fn from_columns(
        hash: Option<Vec<u8>>,
        expires_at: Option<Timestamp>,
    ) -> Result<Option<Self>, DomainError> {
        match (hash, expires_at) {
            (None, None) => Ok(None),
            (Some(bytes), Some(expires_at)) => Ok(Some(Self {
                hash: RefreshTokenHash::from_bytes(&bytes)?,
                expires_at,
            })),
            (Some(_), None) => Err(DomainError::invalid_refresh_credential(
                "hash stored without expiry",
            )),
            (None, Some(_)) => Err(DomainError::invalid_refresh_credential(
                "expiry stored without hash",
            )),
        }
    }

    /// 拆成 (hash, expires_at) 两列，保证同时为空或同时有值。
    pub fn to_columns(value: Option<&Self>) -> (Option<&[u8]>, Option<Timestamp>) {
        match value {
            Some(credential) => (Some(credential.hash.as_bytes()), Some(credential.expires_at)),
            None => (None, None),
        }
    }
}

/// 写入前的不变量检查：清除总是允许，设置时过期时间必须在未来。
pub fn ensure_refresh_write(
    next: Option<&RefreshCredential>,
    now: Timestamp,
) -> Result<(), DomainError> {
    match next {
        None => Ok(()),
        Some(credential) if credential.is_expired(now) => Err(
            DomainError::invalid_refresh_credential("expiry must be in the future"),
        ),
        Some(_) => Ok(()),
    }
}

/// 用户的认证材料。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: UserId,
    pub email: UserEmail,
    pub password: PasswordHash,
    pub refresh: Option<RefreshCredential>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hash() -> RefreshTokenHash {
        RefreshTokenHash::from_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn columns_must_be_both_set_or_both_null() {
        let now = Utc::now();
        assert_eq!(RefreshCredential::from_columns(None, None), Ok(None));
        assert!(RefreshCredential::from_columns(Some(vec![7u8; 32]), Some(now))
            .unwrap()
            .is_some());
        assert!(RefreshCredential::from_columns(Some(vec![7u8; 32]), None).is_err());
        assert!(RefreshCredential::from_columns(None, Some(now)).is_err());
    }

    #[test]
    fn to_columns_pairs_hash_and_expiry() {
        let credential = RefreshCredential::new(hash(), Utc::now(), Duration::days(7));
        let (bytes, expires_at) = RefreshCredential::to_columns(Some(&credential));
        assert!(bytes.is_some() && expires_at.is_some());
        assert_eq!(RefreshCredential::to_columns(None), (None, None));
    }

    #[test]
    fn past_expiry_is_rejected_at_write_time() {
        let now = Utc::now();
        let stale = RefreshCredential {
            hash: hash(),
            expires_at: now - Duration::seconds(1),
        };
        assert!(ensure_refresh_write(Some(&stale), now).is_err());
        assert!(ensure_refresh_write(None, now).is_ok());

        let fresh = RefreshCredential::new(hash(), now, Duration::days(7));
        assert!(ensure_refresh_write(Some(&fresh), now).is_ok());
    }
}
