use crate::user::User;
use crate::value_objects::{RoomId, Timestamp, UserId};

/// 成员关系。每个 (room, user) 最多一行，由存储层唯一约束保证。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub joined_at: Timestamp,
}

impl RoomMember {
    pub fn new(room_id: RoomId, user_id: UserId, joined_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            joined_at,
        }
    }
}

/// 带用户资料的成员关系，用于房间详情。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberWithUser {
    pub member: RoomMember,
    pub user: User,
}
