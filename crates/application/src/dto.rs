use domain::{MemberWithUser, MessageWithSender, Timestamp, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::{MessagePage, RoomDetails, RoomPage, RoomSummary, UserSearchResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: Uuid::from(user.id),
            name: user.name.as_str().to_owned(),
            email: user.email.as_str().to_owned(),
            profile_image_url: user.profile_image_url.clone(),
            bio: user.bio.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSearchDto {
    pub users: Vec<UserDto>,
    pub total: u64,
}

impl From<&UserSearchResult> for UserSearchDto {
    fn from(result: &UserSearchResult) -> Self {
        Self {
            users: result.users.iter().map(UserDto::from).collect(),
            total: result.total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDto {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub joined_at: Timestamp,
}

impl From<&MemberWithUser> for MemberDto {
    fn from(value: &MemberWithUser) -> Self {
        Self {
            user_id: Uuid::from(value.member.user_id),
            name: value.user.name.as_str().to_owned(),
            email: value.user.email.as_str().to_owned(),
            joined_at: value.member.joined_at,
        }
    }
}

/// 房间列表与详情中附带的最新消息摘要。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessageDto {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub created_at: Timestamp,
}

impl From<&MessageWithSender> for LastMessageDto {
    fn from(value: &MessageWithSender) -> Self {
        Self {
            id: Uuid::from(value.message.id),
            content: value.message.content.as_str().to_owned(),
            sender_id: Uuid::from(value.message.sender_id),
            sender_name: value.sender.name.as_str().to_owned(),
            created_at: value.message.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDetailsDto {
    pub id: Uuid,
    pub name: String,
    pub is_group_chat: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub members: Vec<MemberDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageDto>,
}

impl From<&RoomDetails> for RoomDetailsDto {
    fn from(details: &RoomDetails) -> Self {
        Self {
            id: Uuid::from(details.room.id),
            name: details.room.name.clone(),
            is_group_chat: details.room.is_group_chat,
            created_at: details.room.created_at,
            updated_at: details.room.updated_at,
            members: details.members.iter().map(MemberDto::from).collect(),
            last_message: details.last_message.as_ref().map(LastMessageDto::from),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummaryDto {
    pub id: Uuid,
    pub name: String,
    pub is_group_chat: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageDto>,
    pub member_count: u64,
}

impl From<&RoomSummary> for RoomSummaryDto {
    fn from(summary: &RoomSummary) -> Self {
        Self {
            id: Uuid::from(summary.room.id),
            name: summary.room.name.clone(),
            is_group_chat: summary.room.is_group_chat,
            created_at: summary.room.created_at,
            updated_at: summary.room.updated_at,
            last_message: summary.last_message.as_ref().map(LastMessageDto::from),
            member_count: summary.member_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationDto {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListDto {
    pub rooms: Vec<RoomSummaryDto>,
    pub pagination: PaginationDto,
}

impl From<&RoomPage> for RoomListDto {
    fn from(page: &RoomPage) -> Self {
        Self {
            rooms: page.rooms.iter().map(RoomSummaryDto::from).collect(),
            pagination: PaginationDto {
                page: page.page,
                page_size: page.page_size,
                total: page.total,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSenderDto {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub sender: MessageSenderDto,
}

impl From<&MessageWithSender> for MessageDto {
    fn from(value: &MessageWithSender) -> Self {
        let message = &value.message;
        Self {
            id: Uuid::from(message.id),
            room_id: Uuid::from(message.room_id),
            user_id: Uuid::from(message.sender_id),
            content: message.content.as_str().to_owned(),
            file_url: message.attachment_url.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
            sender: MessageSenderDto {
                id: Uuid::from(value.sender.id),
                name: value.sender.name.as_str().to_owned(),
                profile_image_url: value.sender.profile_image_url.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageListDto {
    pub messages: Vec<MessageDto>,
    pub page_size: u32,
    /// 传回 `before` 参数即可获取下一页
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before: Option<String>,
}

impl From<&MessagePage> for MessageListDto {
    fn from(page: &MessagePage) -> Self {
        Self {
            messages: page.messages.iter().map(MessageDto::from).collect(),
            page_size: page.page_size,
            next_before: page.next_before.map(|cursor| cursor.to_string()),
        }
    }
}
