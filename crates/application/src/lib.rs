//! 应用层实现。
//!
//! 围绕领域模型的用例服务：会话与凭据生命周期、成员资格授权、
//! 房间与消息的事务逻辑，以及对外部适配器（密码哈希、头像存储、事务存储）的抽象。

pub mod avatar;
pub mod clock;
pub mod dto;
pub mod error;
pub mod memory;
pub mod password;
pub mod repository;
pub mod services;
pub mod tokens;

#[cfg(test)]
mod test_support;

pub use avatar::{AvatarStorage, AvatarStorageError, ImageFormat};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use memory::MemoryStore;
pub use password::{password_fits, PasswordHasher, PasswordHasherError, MAX_PASSWORD_BYTES};
pub use repository::{
    CredentialRepository, MembershipRepository, MessageRepository, RoomRepository,
    StoreTransaction, TransactionManager, UserRepository,
};
pub use services::{
    AuthOutcome, AuthenticateUserRequest, CreateRoomRequest, ListMessagesQuery,
    MembershipAuthorizer, MessagePage, MessageService, MessageServiceDependencies,
    RegisterUserRequest, RoomDetails, RoomPage, RoomService, RoomServiceDependencies,
    RoomSummary, SendMessageRequest, SessionManager, SessionManagerDependencies, SessionTokens,
    UserSearchResult, UserService, UserServiceDependencies,
};
pub use tokens::{AccessToken, Principal, RefreshToken};
