use crate::errors::DomainError;
use crate::patch::Patch;
use crate::value_objects::{RoomId, Timestamp};

const MAX_ROOM_NAME_LENGTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub is_group_chat: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 房间的部分更新，目前只有名称可改。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomUpdate {
    pub name: Patch<String>,
}

impl ChatRoom {
    pub fn new(
        id: RoomId,
        name: impl Into<String>,
        is_group_chat: bool,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            id,
            name: Self::validate_name(name.into())?,
            is_group_chat,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, update: RoomUpdate, now: Timestamp) -> Result<(), DomainError> {
        if let Patch::Set(name) = update.name {
            self.name = Self::validate_name(name)?;
            self.updated_at = now;
        }
        Ok(())
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if trimmed.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}
