//! 存储抽象。
//!
//! 所有读写都通过一个显式事务 [`StoreTransaction`] 完成：成员资格检查与随后的写入
//! 在同一个事务里执行，避免“检查后再写”的竞态。事务在 `commit` 之前被丢弃即回滚。

use async_trait::async_trait;
use domain::{
    ChatRoom, Credentials, MemberWithUser, Message, MessageCursor, MessageId, MessageWithSender,
    PasswordHash, RefreshCredential, RefreshTokenHash, RepositoryError, RoomId, RoomMember, User,
    UserEmail, UserId,
};
use futures::future::BoxFuture;

#[async_trait]
pub trait UserRepository: Send {
    async fn find_user_by_id(&mut self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_user_by_email(
        &mut self,
        email: &UserEmail,
    ) -> Result<Option<User>, RepositoryError>;
    /// 返回能解析到的用户，不存在的 ID 被忽略。
    async fn find_users_by_ids(&mut self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError>;
    async fn update_profile(&mut self, user: &User) -> Result<(), RepositoryError>;
    /// 名称或邮箱的大小写不敏感子串匹配，返回 (本页结果, 总数)。
    async fn search_users(
        &mut self,
        query: &str,
        limit: u32,
    ) -> Result<(Vec<User>, u64), RepositoryError>;
}

/// 认证材料。只有会话管理器使用这个接口。
///
/// 哈希列只支持等值查找。
#[async_trait]
pub trait CredentialRepository: Send {
    /// 邮箱重复时返回 [`RepositoryError::Conflict`]。
    async fn create_account(
        &mut self,
        user: &User,
        password: &PasswordHash,
    ) -> Result<(), RepositoryError>;
    async fn find_credentials_by_email(
        &mut self,
        email: &UserEmail,
    ) -> Result<Option<Credentials>, RepositoryError>;
    /// 命中的行在事务结束前保持锁定，并发轮换会等待并看到新哈希。
    async fn find_credentials_by_refresh_hash(
        &mut self,
        hash: &RefreshTokenHash,
    ) -> Result<Option<Credentials>, RepositoryError>;
    /// 整体替换 (hash, expires_at)，`None` 表示同时清空。
    async fn store_refresh_credential(
        &mut self,
        user_id: UserId,
        credential: Option<&RefreshCredential>,
    ) -> Result<(), RepositoryError>;
    /// 清空持有该哈希的凭据，返回是否有行被修改。
    async fn clear_refresh_by_hash(
        &mut self,
        hash: &RefreshTokenHash,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait RoomRepository: Send {
    async fn insert_room(&mut self, room: &ChatRoom) -> Result<(), RepositoryError>;
    async fn find_room(&mut self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError>;
    async fn update_room(&mut self, room: &ChatRoom) -> Result<(), RepositoryError>;
    /// 用户所在的房间，按 `updated_at` 倒序，返回 (本页结果, 总数)。
    async fn list_rooms_for_user(
        &mut self,
        user_id: UserId,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<ChatRoom>, u64), RepositoryError>;
}

#[async_trait]
pub trait MembershipRepository: Send {
    async fn membership_exists(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;
    /// (room, user) 已存在时返回 [`RepositoryError::Conflict`]。
    async fn insert_membership(&mut self, member: &RoomMember) -> Result<(), RepositoryError>;
    async fn delete_membership(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;
    /// 按加入时间升序。
    async fn list_members(&mut self, room_id: RoomId)
        -> Result<Vec<MemberWithUser>, RepositoryError>;
    async fn count_members(&mut self, room_id: RoomId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send {
    async fn insert_message(&mut self, message: &Message) -> Result<(), RepositoryError>;
    async fn find_message(
        &mut self,
        id: MessageId,
        include_deleted: bool,
    ) -> Result<Option<Message>, RepositoryError>;
    /// 只更新尚未删除的行，返回是否命中。
    async fn update_message(&mut self, message: &Message) -> Result<bool, RepositoryError>;
    /// 未删除的消息，按 `(created_at, id)` 倒序；只返回排在 `before` 之后的行。
    async fn list_messages(
        &mut self,
        room_id: RoomId,
        before: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<MessageWithSender>, RepositoryError>;
    async fn latest_message(
        &mut self,
        room_id: RoomId,
    ) -> Result<Option<MessageWithSender>, RepositoryError>;
}

/// 一个打开的存储事务。
pub trait StoreTransaction:
    UserRepository
    + CredentialRepository
    + RoomRepository
    + MembershipRepository
    + MessageRepository
    + Send
{
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), RepositoryError>>;
}

#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError>;
}
