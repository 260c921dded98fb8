use std::sync::Arc;

use chrono::Duration;
use config::MessagingConfig;
use domain::{
    DomainError, Message, MessageContent, MessageCursor, MessageId, MessageWithSender, RoomId,
    UserId,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{MessageRepository, StoreTransaction, TransactionManager, UserRepository},
    services::membership::MembershipAuthorizer,
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub attachment_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListMessagesQuery {
    pub room_id: RoomId,
    pub requester_id: UserId,
    /// 只返回排在该游标之后的消息（开区间）
    pub before: Option<MessageCursor>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<MessageWithSender>,
    pub page_size: u32,
    /// 下一页的游标，本页不满时为空
    pub next_before: Option<MessageCursor>,
}

pub struct MessageServiceDependencies {
    pub store: Arc<dyn TransactionManager>,
    pub authorizer: Arc<MembershipAuthorizer>,
    pub clock: Arc<dyn Clock>,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
    edit_window: Duration,
    default_page_size: u32,
    max_page_size: u32,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies, messaging: &MessagingConfig) -> Self {
        Self {
            deps,
            edit_window: Duration::seconds(messaging.edit_window_seconds),
            default_page_size: messaging.default_page_size,
            max_page_size: messaging.max_page_size,
        }
    }

    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<MessageWithSender, ApplicationError> {
        let content = MessageContent::new(request.content)?;
        let attachment_url = request.attachment_url.filter(|url| !url.trim().is_empty());

        let mut tx = self.deps.store.begin().await?;
        self.deps
            .authorizer
            .authorize_room(&mut *tx, request.room_id, request.sender_id)
            .await?;

        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            request.room_id,
            request.sender_id,
            content,
            attachment_url,
            self.deps.clock.now(),
        );
        tx.insert_message(&message).await?;
        let sent = with_sender(&mut *tx, message).await?;
        tx.commit().await?;

        info!(
            message_id = %sent.message.id,
            room_id = %request.room_id,
            user_id = %request.sender_id,
            "消息已发送"
        );
        Ok(sent)
    }

    /// 未删除的消息，新的在前。`before` 为开区间游标，同一时刻的消息按 id 继续排序。
    pub async fn list_messages(
        &self,
        query: ListMessagesQuery,
    ) -> Result<MessagePage, ApplicationError> {
        let page_size = query.page_size.unwrap_or(self.default_page_size);
        if page_size == 0 || page_size > self.max_page_size {
            return Err(DomainError::invalid_argument(
                "page_size",
                format!("must be between 1 and {}", self.max_page_size),
            )
            .into());
        }

        let mut tx = self.deps.store.begin().await?;
        self.deps
            .authorizer
            .authorize_room(&mut *tx, query.room_id, query.requester_id)
            .await?;
        let messages = tx
            .list_messages(query.room_id, query.before, page_size)
            .await?;

        let next_before = if messages.len() == page_size as usize {
            messages.last().map(|m| MessageCursor::at(&m.message))
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            page_size,
            next_before,
        })
    }

    pub async fn get_message(
        &self,
        message_id: MessageId,
        requester: UserId,
    ) -> Result<MessageWithSender, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let message = find_visible(&mut *tx, message_id).await?;
        self.deps
            .authorizer
            .require_member(&mut *tx, message.room_id, requester)
            .await?;
        with_sender(&mut *tx, message).await
    }

    /// 只有发送者本人可以在编辑窗口内修改未删除的消息。
    pub async fn edit_message(
        &self,
        message_id: MessageId,
        requester: UserId,
        new_content: String,
    ) -> Result<MessageWithSender, ApplicationError> {
        let content = MessageContent::new(new_content)?;

        let mut tx = self.deps.store.begin().await?;
        let mut message = self.owned_message(&mut *tx, message_id, requester).await?;

        let now = self.deps.clock.now();
        if !message.within_edit_window(now, self.edit_window) {
            warn!(message_id = %message_id, user_id = %requester, "编辑窗口已过");
            return Err(DomainError::EditWindowExpired.into());
        }

        message.edit(content, now)?;
        if !tx.update_message(&message).await? {
            return Err(DomainError::MessageNotFound.into());
        }
        let edited = with_sender(&mut *tx, message).await?;
        tx.commit().await?;

        info!(message_id = %message_id, user_id = %requester, "消息已编辑");
        Ok(edited)
    }

    /// 软删除：设置删除时间，行本身保留。
    pub async fn delete_message(
        &self,
        message_id: MessageId,
        requester: UserId,
    ) -> Result<(), ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let mut message = self.owned_message(&mut *tx, message_id, requester).await?;

        message.mark_deleted(self.deps.clock.now())?;
        if !tx.update_message(&message).await? {
            return Err(DomainError::MessageNotFound.into());
        }
        tx.commit().await?;

        info!(message_id = %message_id, user_id = %requester, "消息已删除");
        Ok(())
    }

    /// 内部查询路径，包含已软删除的消息，不经 HTTP 暴露。
    pub async fn find_message_including_deleted(
        &self,
        message_id: MessageId,
    ) -> Result<Option<Message>, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        Ok(tx.find_message(message_id, true).await?)
    }

    async fn owned_message(
        &self,
        tx: &mut dyn StoreTransaction,
        message_id: MessageId,
        requester: UserId,
    ) -> Result<Message, ApplicationError> {
        let message = find_visible(tx, message_id).await?;
        self.deps
            .authorizer
            .require_member(tx, message.room_id, requester)
            .await?;
        if !message.is_sent_by(requester) {
            return Err(DomainError::NotMessageOwner.into());
        }
        Ok(message)
    }
}

async fn find_visible(
    tx: &mut dyn StoreTransaction,
    message_id: MessageId,
) -> Result<Message, ApplicationError> {
    Ok(tx
        .find_message(message_id, false)
        .await?
        .ok_or(DomainError::MessageNotFound)?)
}

async fn with_sender(
    tx: &mut dyn StoreTransaction,
    message: Message,
) -> Result<MessageWithSender, ApplicationError> {
    let sender = tx
        .find_user_by_id(message.sender_id)
        .await?
        .ok_or(DomainError::UserNotFound)?;
    Ok(MessageWithSender { message, sender })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use domain::ChatRoom;

    struct Scene {
        harness: Harness,
        alice: UserId,
        bob: UserId,
        room: ChatRoom,
    }

    async fn scene() -> Scene {
        let harness = Harness::new();
        let (alice, _) = harness.register("Alice", "a@x.com", "Passw0rd1").await;
        let (bob, _) = harness.register("Bob", "b@x.com", "Passw0rd1").await;
        let room = harness.room(alice.id, "Team", &[]).await;
        Scene {
            harness,
            alice: alice.id,
            bob: bob.id,
            room,
        }
    }

    async fn send(scene: &Scene, sender: UserId, content: &str) -> MessageWithSender {
        scene
            .harness
            .messages
            .send_message(SendMessageRequest {
                room_id: scene.room.id,
                sender_id: sender,
                content: content.into(),
                attachment_url: None,
            })
            .await
            .unwrap()
    }

    fn list(scene: &Scene, requester: UserId) -> ListMessagesQuery {
        ListMessagesQuery {
            room_id: scene.room.id,
            requester_id: requester,
            before: None,
            page_size: Some(10),
        }
    }

    #[tokio::test]
    async fn non_member_is_forbidden_everywhere() {
        let s = scene().await;
        let sent = send(&s, s.alice, "hi").await;
        let forbidden = |r: &Result<_, ApplicationError>| {
            matches!(r, Err(ApplicationError::Domain(DomainError::UserNotInRoom)))
        };

        let send_result = s
            .harness
            .messages
            .send_message(SendMessageRequest {
                room_id: s.room.id,
                sender_id: s.bob,
                content: "let me in".into(),
                attachment_url: None,
            })
            .await
            .map(|_| ());
        assert!(forbidden(&send_result));

        let list_result = s.harness.messages.list_messages(list(&s, s.bob)).await.map(|_| ());
        assert!(forbidden(&list_result));

        let edit_result = s
            .harness
            .messages
            .edit_message(sent.message.id, s.bob, "edited".into())
            .await
            .map(|_| ());
        assert!(forbidden(&edit_result));

        let get_result = s
            .harness
            .messages
            .get_message(sent.message.id, s.bob)
            .await
            .map(|_| ());
        assert!(forbidden(&get_result));
    }

    #[tokio::test]
    async fn only_the_sender_may_edit_or_delete() {
        let s = scene().await;
        s.harness
            .rooms
            .add_member(s.room.id, s.alice, s.bob)
            .await
            .unwrap();
        let sent = send(&s, s.alice, "mine").await;

        assert!(matches!(
            s.harness
                .messages
                .edit_message(sent.message.id, s.bob, "theirs".into())
                .await,
            Err(ApplicationError::Domain(DomainError::NotMessageOwner))
        ));
        assert!(matches!(
            s.harness.messages.delete_message(sent.message.id, s.bob).await,
            Err(ApplicationError::Domain(DomainError::NotMessageOwner))
        ));
    }

    #[tokio::test]
    async fn edit_window_is_enforced() {
        let s = scene().await;
        let early = send(&s, s.alice, "early").await;

        s.harness.clock.advance(Duration::minutes(4));
        let edited = s
            .harness
            .messages
            .edit_message(early.message.id, s.alice, "edited".into())
            .await
            .unwrap();
        assert_eq!(edited.message.content.as_str(), "edited");
        assert_eq!(edited.message.updated_at, s.harness.clock.now());

        s.harness.clock.advance(Duration::minutes(2));
        let late = s
            .harness
            .messages
            .edit_message(early.message.id, s.alice, "too late".into())
            .await;
        assert!(matches!(
            late,
            Err(ApplicationError::Domain(DomainError::EditWindowExpired))
        ));
    }

    #[tokio::test]
    async fn soft_deleted_messages_are_hidden_but_kept() {
        let s = scene().await;
        let keep = send(&s, s.alice, "keep").await;
        s.harness.clock.advance(Duration::seconds(1));
        let gone = send(&s, s.alice, "gone").await;

        s.harness
            .messages
            .delete_message(gone.message.id, s.alice)
            .await
            .unwrap();

        let page = s.harness.messages.list_messages(list(&s, s.alice)).await.unwrap();
        let ids: Vec<_> = page.messages.iter().map(|m| m.message.id).collect();
        assert_eq!(ids, vec![keep.message.id]);

        assert!(matches!(
            s.harness.messages.get_message(gone.message.id, s.alice).await,
            Err(ApplicationError::Domain(DomainError::MessageNotFound))
        ));
        assert!(matches!(
            s.harness
                .messages
                .edit_message(gone.message.id, s.alice, "revive".into())
                .await,
            Err(ApplicationError::Domain(DomainError::MessageNotFound))
        ));

        let internal = s
            .harness
            .messages
            .find_message_including_deleted(gone.message.id)
            .await
            .unwrap()
            .unwrap();
        assert!(internal.is_deleted());
        assert_eq!(internal.content.as_str(), "gone");

        let details = s.harness.rooms.get_room(s.room.id, s.alice).await.unwrap();
        assert_eq!(
            details.last_message.map(|m| m.message.id),
            Some(keep.message.id)
        );
    }

    #[tokio::test]
    async fn keyset_pagination_walks_backwards() {
        let s = scene().await;
        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(send(&s, s.alice, &format!("m{i}")).await.message.id);
            s.harness.clock.advance(Duration::seconds(1));
        }

        let mut query = list(&s, s.alice);
        query.page_size = Some(2);
        let first = s.harness.messages.list_messages(query.clone()).await.unwrap();
        assert_eq!(
            first.messages.iter().map(|m| m.message.id).collect::<Vec<_>>(),
            vec![sent[4], sent[3]]
        );

        query.before = first.next_before;
        let second = s.harness.messages.list_messages(query.clone()).await.unwrap();
        assert_eq!(
            second.messages.iter().map(|m| m.message.id).collect::<Vec<_>>(),
            vec![sent[2], sent[1]]
        );

        query.before = second.next_before;
        let last = s.harness.messages.list_messages(query).await.unwrap();
        assert_eq!(last.messages.len(), 1);
        assert!(last.next_before.is_none());
    }

    #[tokio::test]
    async fn pagination_keeps_messages_sharing_a_timestamp() {
        let s = scene().await;
        let mut sent = Vec::new();
        for i in 0..3 {
            sent.push(send(&s, s.alice, &format!("m{i}")).await.message.id);
        }

        let mut query = list(&s, s.alice);
        query.page_size = Some(2);
        let mut seen = Vec::new();
        loop {
            let page = s.harness.messages.list_messages(query.clone()).await.unwrap();
            seen.extend(page.messages.iter().map(|m| m.message.id));
            match page.next_before {
                Some(cursor) => query.before = Some(cursor),
                None => break,
            }
        }

        assert_eq!(seen.len(), 3);
        sent.sort_by(|a, b| b.0.cmp(&a.0));
        assert_eq!(seen, sent);
    }

    #[tokio::test]
    async fn plain_timestamp_cursor_excludes_that_instant() {
        let s = scene().await;
        let older = send(&s, s.alice, "older").await;
        s.harness.clock.advance(Duration::seconds(1));
        let boundary = send(&s, s.alice, "boundary").await;

        let mut query = list(&s, s.alice);
        query.before = Some(MessageCursor::older_than(boundary.message.created_at));
        let page = s.harness.messages.list_messages(query).await.unwrap();
        let ids: Vec<_> = page.messages.iter().map(|m| m.message.id).collect();
        assert_eq!(ids, vec![older.message.id]);
    }

    #[tokio::test]
    async fn page_size_out_of_range_is_rejected() {
        let s = scene().await;
        for size in [0, 101] {
            let mut query = list(&s, s.alice);
            query.page_size = Some(size);
            assert!(matches!(
                s.harness.messages.list_messages(query).await,
                Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
            ));
        }
    }

    #[tokio::test]
    async fn blank_or_oversized_content_is_rejected() {
        let s = scene().await;
        for content in ["   ".to_string(), "x".repeat(2001)] {
            let result = s
                .harness
                .messages
                .send_message(SendMessageRequest {
                    room_id: s.room.id,
                    sender_id: s.alice,
                    content,
                    attachment_url: None,
                })
                .await;
            assert!(matches!(
                result,
                Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
            ));
        }
    }
}
