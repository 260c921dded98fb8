use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::user::User;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

pub use crate::value_objects::MAX_MESSAGE_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub attachment_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// 软删除时间。设置后消息对普通查询不可见。
    pub deleted_at: Option<Timestamp>,
}

impl Message {
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        content: MessageContent,
        attachment_url: Option<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            content,
            attachment_url,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_sent_by(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }

    /// 创建后经过的时间严格小于 `window` 时才允许编辑。
    pub fn within_edit_window(&self, now: Timestamp, window: Duration) -> bool {
        now - self.created_at < window
    }

    pub fn edit(&mut self, new_content: MessageContent, at: Timestamp) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::MessageNotFound);
        }
        self.content = new_content;
        self.updated_at = at;
        Ok(())
    }

    pub fn mark_deleted(&mut self, at: Timestamp) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::MessageNotFound);
        }
        self.deleted_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

/// 消息及其发送者资料。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWithSender {
    pub message: Message,
    pub sender: User,
}

/// 消息分页游标，按 `(created_at, id)` 倒序取严格更早的行。
///
/// 文本形式为 `<RFC 3339 时间>_<消息 id>`，客户端应原样传回。
/// 只给时间时 id 取 nil UUID，等价于"早于该时间"。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCursor {
    pub created_at: Timestamp,
    pub id: MessageId,
}

impl MessageCursor {
    pub fn at(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id,
        }
    }

    pub fn older_than(created_at: Timestamp) -> Self {
        Self {
            created_at,
            id: MessageId(Uuid::nil()),
        }
    }

    /// 消息是否排在游标之后（即更早）。
    pub fn precedes(&self, message: &Message) -> bool {
        (message.created_at, message.id.0) < (self.created_at, self.id.0)
    }
}

impl fmt::Display for MessageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.id.0.simple()
        )
    }
}

impl FromStr for MessageCursor {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid =
            || DomainError::invalid_argument("before", "expected a cursor or an RFC 3339 timestamp");
        let parse_time = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|_| invalid())
        };

        match raw.split_once('_') {
            Some((time, id)) => Ok(Self {
                created_at: parse_time(time)?,
                id: MessageId(Uuid::parse_str(id).map_err(|_| invalid())?),
            }),
            None => parse_time(raw).map(Self::older_than),
        }
    }
}
