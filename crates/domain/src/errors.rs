//! 领域模型错误定义
//!
//! 业务规则违反使用 [`DomainError`]，存储层失败使用 [`RepositoryError`]。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 输入不满足语义约束
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("user not found")]
    UserNotFound,

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    /// 成员关系 (room, user) 已存在
    #[error("user already joined room")]
    UserAlreadyInRoom,

    /// 请求者不是房间成员
    #[error("user not in room")]
    UserNotInRoom,

    /// 要移除的成员关系不存在
    #[error("membership not found")]
    MembershipNotFound,

    /// 建房时的成员列表中包含不存在的用户
    #[error("one or more members do not exist")]
    UnknownMember,

    /// 只有发送者本人可以修改或删除消息
    #[error("only the sender may modify this message")]
    NotMessageOwner,

    #[error("message edit window has expired")]
    EditWindowExpired,

    /// 刷新令牌哈希与过期时间必须同时存在或同时为空
    #[error("refresh credential invariant violated: {reason}")]
    InvalidRefreshCredential { reason: String },
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_refresh_credential(reason: impl Into<String>) -> Self {
        Self::InvalidRefreshCredential {
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误。唯一约束冲突单独区分，便于上层映射为业务冲突。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
