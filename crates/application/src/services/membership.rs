//! 成员资格授权
//!
//! 所有检查都在调用方传入的事务里执行，检查与随后的写入看到的是同一份数据。
//! (room, user) 唯一约束由存储层保证，并发插入时的冲突映射为 `UserAlreadyInRoom`。

use std::sync::Arc;

use domain::{ChatRoom, DomainError, MemberWithUser, RepositoryError, RoomId, RoomMember, UserId};
use tracing::info;

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{MembershipRepository, RoomRepository, StoreTransaction, UserRepository},
};

pub struct MembershipAuthorizer {
    clock: Arc<dyn Clock>,
}

impl MembershipAuthorizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub async fn is_member(
        &self,
        tx: &mut dyn StoreTransaction,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, ApplicationError> {
        Ok(tx.membership_exists(room_id, user_id).await?)
    }

    /// 房间不存在返回 `RoomNotFound`，存在但不是成员返回 `UserNotInRoom`。
    pub async fn authorize_room(
        &self,
        tx: &mut dyn StoreTransaction,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<ChatRoom, ApplicationError> {
        let room = tx
            .find_room(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound)?;
        self.require_member(tx, room_id, user_id).await?;
        Ok(room)
    }

    pub async fn require_member(
        &self,
        tx: &mut dyn StoreTransaction,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        if !self.is_member(tx, room_id, user_id).await? {
            return Err(DomainError::UserNotInRoom.into());
        }
        Ok(())
    }

    pub async fn add_member(
        &self,
        tx: &mut dyn StoreTransaction,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<MemberWithUser, ApplicationError> {
        let user = tx
            .find_user_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        if self.is_member(tx, room_id, user_id).await? {
            return Err(DomainError::UserAlreadyInRoom.into());
        }

        let member = RoomMember::new(room_id, user_id, self.clock.now());
        tx.insert_membership(&member).await.map_err(|err| match err {
            RepositoryError::Conflict => ApplicationError::from(DomainError::UserAlreadyInRoom),
            other => ApplicationError::from(other),
        })?;

        info!(room_id = %room_id, user_id = %user_id, "成员已加入房间");
        Ok(MemberWithUser { member, user })
    }

    pub async fn remove_member(
        &self,
        tx: &mut dyn StoreTransaction,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        if !tx.delete_membership(room_id, user_id).await? {
            return Err(DomainError::MembershipNotFound.into());
        }
        info!(room_id = %room_id, user_id = %user_id, "成员已移出房间");
        Ok(())
    }
}
