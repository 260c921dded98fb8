use async_trait::async_trait;
use domain::PasswordHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("hash error: {0}")]
    Hash(String),
    #[error("verify error: {0}")]
    Verify(String),
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::Hash(message.into())
    }

    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

/// 明文密码的字节上限。超出部分会被 bcrypt 截断，因此直接拒绝。
pub const MAX_PASSWORD_BYTES: usize = 72;

pub fn password_fits(plaintext: &str) -> bool {
    plaintext.len() <= MAX_PASSWORD_BYTES
}

/// 自适应、加盐的单向密码哈希。
///
/// 实现会占用 CPU 较长时间，调用方不能在持有数据库事务时等待它。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;

    /// 对完整明文和完整哈希做比较，只返回布尔结果。超长明文视为不匹配。
    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}
