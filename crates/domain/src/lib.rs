//! 聊天系统核心领域模型
//!
//! 包含用户、凭据、聊天室、成员关系、消息等核心实体，以及相关的校验规则。

pub mod chat_room;
pub mod credentials;
pub mod errors;
pub mod message;
pub mod patch;
pub mod room_member;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat_room::{ChatRoom, RoomUpdate};
pub use credentials::{ensure_refresh_write, Credentials, RefreshCredential};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{Message, MessageCursor, MessageWithSender, MAX_MESSAGE_LENGTH};
pub use patch::Patch;
pub use room_member::{MemberWithUser, RoomMember};
pub use user::{ProfileUpdate, User};
pub use value_objects::{
    DisplayName, MessageContent, MessageId, PasswordHash, RefreshTokenHash, RoomId, Timestamp,
    UserEmail, UserId,
};
