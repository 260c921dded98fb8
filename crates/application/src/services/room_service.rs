use std::collections::HashSet;
use std::sync::Arc;

use config::MessagingConfig;
use domain::{
    ChatRoom, DomainError, MemberWithUser, MessageWithSender, RoomId, RoomMember, RoomUpdate,
    UserId,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{
        MembershipRepository, MessageRepository, RoomRepository, StoreTransaction,
        TransactionManager, UserRepository,
    },
    services::membership::MembershipAuthorizer,
};

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub creator_id: UserId,
    pub name: String,
    pub is_group_chat: bool,
    pub member_ids: Vec<UserId>,
}

/// 房间详情：成员列表与最新一条未删除消息。
#[derive(Debug, Clone)]
pub struct RoomDetails {
    pub room: ChatRoom,
    pub members: Vec<MemberWithUser>,
    pub last_message: Option<MessageWithSender>,
}

#[derive(Debug, Clone)]
pub struct RoomSummary {
    pub room: ChatRoom,
    pub member_count: u64,
    pub last_message: Option<MessageWithSender>,
}

#[derive(Debug, Clone)]
pub struct RoomPage {
    pub rooms: Vec<RoomSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

pub struct RoomServiceDependencies {
    pub store: Arc<dyn TransactionManager>,
    pub authorizer: Arc<MembershipAuthorizer>,
    pub clock: Arc<dyn Clock>,
}

pub struct RoomService {
    deps: RoomServiceDependencies,
    default_page_size: u32,
    max_page_size: u32,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies, messaging: &MessagingConfig) -> Self {
        Self {
            deps,
            default_page_size: messaging.default_room_page_size,
            max_page_size: messaging.max_page_size,
        }
    }

    /// 创建房间及其初始成员。创建者总是成员，重复的成员 ID 会被合并。
    ///
    /// 房间行与所有成员行在同一事务中写入，任何一步失败都不会留下房间。
    pub async fn create_room(
        &self,
        request: CreateRoomRequest,
    ) -> Result<RoomDetails, ApplicationError> {
        let now = self.deps.clock.now();
        let room = ChatRoom::new(
            RoomId::from(Uuid::new_v4()),
            request.name,
            request.is_group_chat,
            now,
        )?;

        let mut seen = HashSet::new();
        let member_ids: Vec<UserId> = std::iter::once(request.creator_id)
            .chain(request.member_ids)
            .filter(|id| seen.insert(*id))
            .collect();

        let mut tx = self.deps.store.begin().await?;

        let resolved = tx.find_users_by_ids(&member_ids).await?;
        if resolved.len() != member_ids.len() {
            return Err(DomainError::UnknownMember.into());
        }

        tx.insert_room(&room).await?;
        for user_id in &member_ids {
            tx.insert_membership(&RoomMember::new(room.id, *user_id, now))
                .await?;
        }

        let details = load_details(&mut *tx, room).await?;
        tx.commit().await?;

        info!(
            room_id = %details.room.id,
            creator_id = %request.creator_id,
            members = member_ids.len(),
            "房间创建成功"
        );
        Ok(details)
    }

    /// 请求者所在的房间，最近更新的在前。
    pub async fn list_rooms(
        &self,
        requester: UserId,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<RoomPage, ApplicationError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(DomainError::invalid_argument("page", "must be at least 1").into());
        }
        let page_size = page_size.unwrap_or(self.default_page_size);
        if page_size == 0 || page_size > self.max_page_size {
            return Err(DomainError::invalid_argument(
                "page_size",
                format!("must be between 1 and {}", self.max_page_size),
            )
            .into());
        }

        let mut tx = self.deps.store.begin().await?;
        let offset = u64::from(page - 1) * u64::from(page_size);
        let (rooms, total) = tx.list_rooms_for_user(requester, page_size, offset).await?;

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let member_count = tx.count_members(room.id).await?;
            let last_message = tx.latest_message(room.id).await?;
            summaries.push(RoomSummary {
                room,
                member_count,
                last_message,
            });
        }

        Ok(RoomPage {
            rooms: summaries,
            page,
            page_size,
            total,
        })
    }

    pub async fn get_room(
        &self,
        room_id: RoomId,
        requester: UserId,
    ) -> Result<RoomDetails, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let room = self
            .deps
            .authorizer
            .authorize_room(&mut *tx, room_id, requester)
            .await?;
        load_details(&mut *tx, room).await
    }

    /// 任何成员都可以修改房间名称。
    pub async fn update_room(
        &self,
        room_id: RoomId,
        requester: UserId,
        update: RoomUpdate,
    ) -> Result<RoomDetails, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let mut room = self
            .deps
            .authorizer
            .authorize_room(&mut *tx, room_id, requester)
            .await?;

        if update.name.is_set() {
            room.apply_update(update, self.deps.clock.now())?;
            tx.update_room(&room).await?;
        }

        let details = load_details(&mut *tx, room).await?;
        tx.commit().await?;
        info!(room_id = %room_id, user_id = %requester, "房间已更新");
        Ok(details)
    }

    pub async fn add_member(
        &self,
        room_id: RoomId,
        requester: UserId,
        user_id: UserId,
    ) -> Result<MemberWithUser, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        self.deps
            .authorizer
            .authorize_room(&mut *tx, room_id, requester)
            .await?;
        let member = self
            .deps
            .authorizer
            .add_member(&mut *tx, room_id, user_id)
            .await?;
        tx.commit().await?;
        Ok(member)
    }

    pub async fn remove_member(
        &self,
        room_id: RoomId,
        requester: UserId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        self.deps
            .authorizer
            .authorize_room(&mut *tx, room_id, requester)
            .await?;
        self.deps
            .authorizer
            .remove_member(&mut *tx, room_id, user_id)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn load_details(
    tx: &mut dyn StoreTransaction,
    room: ChatRoom,
) -> Result<RoomDetails, ApplicationError> {
    let members = tx.list_members(room.id).await?;
    let last_message = tx.latest_message(room.id).await?;
    Ok(RoomDetails {
        room,
        members,
        last_message,
    })
}
