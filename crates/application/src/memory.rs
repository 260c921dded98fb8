//! 内存存储实现。
//!
//! 与 PostgreSQL 实现保持相同的唯一约束和全有或全无的事务语义，
//! 用于服务层测试和无数据库的本地运行。事务持有整个存储的锁，
//! 在副本上修改，提交时整体写回，丢弃即回滚。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ChatRoom, Credentials, MemberWithUser, Message, MessageCursor, MessageId, MessageWithSender,
    PasswordHash, RefreshCredential, RefreshTokenHash, RepositoryError, RoomId, RoomMember, User,
    UserEmail, UserId,
};
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::repository::{
    CredentialRepository, MembershipRepository, MessageRepository, RoomRepository,
    StoreTransaction, TransactionManager, UserRepository,
};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password: PasswordHash,
    refresh: Option<RefreshCredential>,
}

impl StoredUser {
    fn credentials(&self) -> Credentials {
        Credentials {
            user_id: self.user.id,
            email: self.user.email.clone(),
            password: self.password.clone(),
            refresh: self.refresh.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<UserId, StoredUser>,
    rooms: HashMap<RoomId, ChatRoom>,
    members: HashMap<(RoomId, UserId), RoomMember>,
    messages: HashMap<MessageId, Message>,
    faults: Faults,
}

/// 测试注入的故障，只能通过 `testing` 特性下的接口打开。
#[derive(Debug, Clone, Default)]
struct Faults {
    failing_members: HashSet<UserId>,
    /// 这些用户的成员存在性检查总是返回 false，插入时由唯一约束拦下。
    unseen_members: HashSet<UserId>,
    unavailable: bool,
}

impl MemoryState {
    fn with_sender(&self, message: &Message) -> Result<MessageWithSender, RepositoryError> {
        let sender = self
            .users
            .get(&message.sender_id)
            .map(|stored| stored.user.clone())
            .ok_or_else(|| RepositoryError::storage("message sender missing"))?;
        Ok(MessageWithSender {
            message: message.clone(),
            sender,
        })
    }

    fn visible_messages(&self, room_id: RoomId) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| m.room_id == room_id && !m.is_deleted())
            .collect();
        messages.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        messages
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(any(test, feature = "testing"))]
impl MemoryStore {
    /// 之后任何针对该用户的成员关系插入都会失败，用于验证事务回滚。
    pub async fn fail_membership_insert_for(&self, user_id: UserId) {
        self.state.lock().await.faults.failing_members.insert(user_id);
    }

    /// 让成员预检查看不到该用户，模拟并发插入时两个事务都通过了预检查。
    pub async fn hide_membership_of(&self, user_id: UserId) {
        self.state.lock().await.faults.unseen_members.insert(user_id);
    }

    /// 之后开启事务一律失败。
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.faults.unavailable = unavailable;
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }

    pub async fn membership_count(&self, room_id: RoomId) -> usize {
        self.state
            .lock()
            .await
            .members
            .keys()
            .filter(|(room, _)| *room == room_id)
            .count()
    }

    /// 直接读取已提交的刷新凭据，测试用。
    pub async fn refresh_credential(&self, user_id: UserId) -> Option<RefreshCredential> {
        self.state
            .lock()
            .await
            .users
            .get(&user_id)
            .and_then(|stored| stored.refresh.clone())
    }
}

#[async_trait]
impl TransactionManager for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError> {
        let guard = self.state.clone().lock_owned().await;
        if guard.faults.unavailable {
            return Err(RepositoryError::storage("store unavailable"));
        }
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl StoreTransaction for MemoryTransaction {
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), RepositoryError>> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Box::pin(futures::future::ready(Ok(())))
    }
}

#[async_trait]
impl UserRepository for MemoryTransaction {
    async fn find_user_by_id(&mut self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.working.users.get(&id).map(|stored| stored.user.clone()))
    }

    async fn find_user_by_email(
        &mut self,
        email: &UserEmail,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .working
            .users
            .values()
            .find(|stored| &stored.user.email == email)
            .map(|stored| stored.user.clone()))
    }

    async fn find_users_by_ids(&mut self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.users.get(id))
            .map(|stored| stored.user.clone())
            .collect())
    }

    async fn update_profile(&mut self, user: &User) -> Result<(), RepositoryError> {
        let stored = self
            .working
            .users
            .get_mut(&user.id)
            .ok_or(RepositoryError::NotFound)?;
        stored.user = user.clone();
        Ok(())
    }

    async fn search_users(
        &mut self,
        query: &str,
        limit: u32,
    ) -> Result<(Vec<User>, u64), RepositoryError> {
        let needle = query.to_lowercase();
        let mut matches: Vec<User> = self
            .working
            .users
            .values()
            .filter(|stored| {
                stored.user.name.as_str().to_lowercase().contains(&needle)
                    || stored.user.email.as_str().contains(&needle)
            })
            .map(|stored| stored.user.clone())
            .collect();
        matches.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        let total = matches.len() as u64;
        matches.truncate(limit as usize);
        Ok((matches, total))
    }
}

#[async_trait]
impl CredentialRepository for MemoryTransaction {
    async fn create_account(
        &mut self,
        user: &User,
        password: &PasswordHash,
    ) -> Result<(), RepositoryError> {
        let duplicate = self.working.users.contains_key(&user.id)
            || self
                .working
                .users
                .values()
                .any(|stored| stored.user.email == user.email);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        self.working.users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                password: password.clone(),
                refresh: None,
            },
        );
        Ok(())
    }

    async fn find_credentials_by_email(
        &mut self,
        email: &UserEmail,
    ) -> Result<Option<Credentials>, RepositoryError> {
        Ok(self
            .working
            .users
            .values()
            .find(|stored| &stored.user.email == email)
            .map(StoredUser::credentials))
    }

    async fn find_credentials_by_refresh_hash(
        &mut self,
        hash: &RefreshTokenHash,
    ) -> Result<Option<Credentials>, RepositoryError> {
        Ok(self
            .working
            .users
            .values()
            .find(|stored| stored.refresh.as_ref().map(|r| &r.hash) == Some(hash))
            .map(StoredUser::credentials))
    }

    async fn store_refresh_credential(
        &mut self,
        user_id: UserId,
        credential: Option<&RefreshCredential>,
    ) -> Result<(), RepositoryError> {
        if let Some(next) = credential {
            let taken = self.working.users.values().any(|stored| {
                stored.user.id != user_id
                    && stored.refresh.as_ref().map(|r| &r.hash) == Some(&next.hash)
            });
            if taken {
                return Err(RepositoryError::Conflict);
            }
        }
        let stored = self
            .working
            .users
            .get_mut(&user_id)
            .ok_or(RepositoryError::NotFound)?;
        stored.refresh = credential.cloned();
        Ok(())
    }

    async fn clear_refresh_by_hash(
        &mut self,
        hash: &RefreshTokenHash,
    ) -> Result<bool, RepositoryError> {
        let stored = self
            .working
            .users
            .values_mut()
            .find(|stored| stored.refresh.as_ref().map(|r| &r.hash) == Some(hash));
        match stored {
            Some(stored) => {
                stored.refresh = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RoomRepository for MemoryTransaction {
    async fn insert_room(&mut self, room: &ChatRoom) -> Result<(), RepositoryError> {
        if self.working.rooms.contains_key(&room.id) {
            return Err(RepositoryError::Conflict);
        }
        self.working.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn find_room(&mut self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        Ok(self.working.rooms.get(&id).cloned())
    }

    async fn update_room(&mut self, room: &ChatRoom) -> Result<(), RepositoryError> {
        let stored = self
            .working
            .rooms
            .get_mut(&room.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = room.clone();
        Ok(())
    }

    async fn list_rooms_for_user(
        &mut self,
        user_id: UserId,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<ChatRoom>, u64), RepositoryError> {
        let mut rooms: Vec<ChatRoom> = self
            .working
            .members
            .keys()
            .filter(|(_, member)| *member == user_id)
            .filter_map(|(room_id, _)| self.working.rooms.get(room_id).cloned())
            .collect();
        rooms.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        let total = rooms.len() as u64;
        let page = rooms
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl MembershipRepository for MemoryTransaction {
    async fn membership_exists(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        if self.working.faults.unseen_members.contains(&user_id) {
            return Ok(false);
        }
        Ok(self.working.members.contains_key(&(room_id, user_id)))
    }

    async fn insert_membership(&mut self, member: &RoomMember) -> Result<(), RepositoryError> {
        if self.working.faults.failing_members.contains(&member.user_id) {
            return Err(RepositoryError::storage("injected membership failure"));
        }
        if !self.working.rooms.contains_key(&member.room_id)
            || !self.working.users.contains_key(&member.user_id)
        {
            return Err(RepositoryError::storage("foreign key violation"));
        }
        let key = (member.room_id, member.user_id);
        if self.working.members.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        self.working.members.insert(key, member.clone());
        Ok(())
    }

    async fn delete_membership(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.working.members.remove(&(room_id, user_id)).is_some())
    }

    async fn list_members(
        &mut self,
        room_id: RoomId,
    ) -> Result<Vec<MemberWithUser>, RepositoryError> {
        let mut members = self
            .working
            .members
            .values()
            .filter(|member| member.room_id == room_id)
            .map(|member| {
                let user = self
                    .working
                    .users
                    .get(&member.user_id)
                    .map(|stored| stored.user.clone())
                    .ok_or_else(|| RepositoryError::storage("member user missing"))?;
                Ok(MemberWithUser {
                    member: member.clone(),
                    user,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        members.sort_by(|a, b| {
            a.member
                .joined_at
                .cmp(&b.member.joined_at)
                .then_with(|| a.member.user_id.0.cmp(&b.member.user_id.0))
        });
        Ok(members)
    }

    async fn count_members(&mut self, room_id: RoomId) -> Result<u64, RepositoryError> {
        Ok(self
            .working
            .members
            .keys()
            .filter(|(room, _)| *room == room_id)
            .count() as u64)
    }
}

#[async_trait]
impl MessageRepository for MemoryTransaction {
    async fn insert_message(&mut self, message: &Message) -> Result<(), RepositoryError> {
        if self.working.messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        self.working.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn find_message(
        &mut self,
        id: MessageId,
        include_deleted: bool,
    ) -> Result<Option<Message>, RepositoryError> {
        Ok(self
            .working
            .messages
            .get(&id)
            .filter(|message| include_deleted || !message.is_deleted())
            .cloned())
    }

    async fn update_message(&mut self, message: &Message) -> Result<bool, RepositoryError> {
        match self.working.messages.get_mut(&message.id) {
            Some(stored) if !stored.is_deleted() => {
                *stored = message.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_messages(
        &mut self,
        room_id: RoomId,
        before: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<MessageWithSender>, RepositoryError> {
        self.working
            .visible_messages(room_id)
            .into_iter()
            .filter(|message| before.map_or(true, |cursor| cursor.precedes(message)))
            .take(limit as usize)
            .map(|message| self.working.with_sender(message))
            .collect()
    }

    async fn latest_message(
        &mut self,
        room_id: RoomId,
    ) -> Result<Option<MessageWithSender>, RepositoryError> {
        self.working
            .visible_messages(room_id)
            .first()
            .map(|message| self.working.with_sender(message))
            .transpose()
    }
}
