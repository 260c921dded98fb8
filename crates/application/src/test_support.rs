//! 服务层测试夹具：内存存储 + 手动时钟 + 快速的假密码哈希。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use config::AppConfig;
use domain::{ChatRoom, PasswordHash, User, UserId};

use crate::{
    avatar::{AvatarStorage, AvatarStorageError, ImageFormat},
    clock::ManualClock,
    memory::MemoryStore,
    password::{PasswordHasher, PasswordHasherError},
    services::{
        CreateRoomRequest, MembershipAuthorizer, MessageService, MessageServiceDependencies,
        RegisterUserRequest, RoomService, RoomServiceDependencies, SessionManager,
        SessionManagerDependencies, SessionTokens, UserService, UserServiceDependencies,
    },
};

/// 可逆的假哈希，只用于测试。
pub struct FakeHasher;

#[async_trait]
impl PasswordHasher for FakeHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("fake${plaintext}"))
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("fake${plaintext}"))
    }
}

pub struct FakeAvatarStorage;

#[async_trait]
impl AvatarStorage for FakeAvatarStorage {
    async fn store(&self, bytes: &[u8], format: ImageFormat) -> Result<String, AvatarStorageError> {
        Ok(format!(
            "https://cdn.test/avatars/{}.{}",
            bytes.len(),
            format.extension()
        ))
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub session: Arc<SessionManager>,
    pub users: UserService,
    pub rooms: RoomService,
    pub messages: MessageService,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Arc::new(FakeHasher), Arc::new(FakeAvatarStorage))
    }

    pub fn with_hasher(hasher: Arc<dyn PasswordHasher>) -> Self {
        Self::build(hasher, Arc::new(FakeAvatarStorage))
    }

    pub fn with_avatar_storage(storage: Arc<dyn AvatarStorage>) -> Self {
        Self::build(Arc::new(FakeHasher), storage)
    }

    fn build(hasher: Arc<dyn PasswordHasher>, avatar_storage: Arc<dyn AvatarStorage>) -> Self {
        let mut config = AppConfig::default();
        config.jwt.secret = "unit-test-signing-key-0123456789abcdef".to_string();

        let store = MemoryStore::new();
        let clock = Arc::new(
            ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()),
        );
        let session = Arc::new(SessionManager::new(
            SessionManagerDependencies {
                store: Arc::new(store.clone()),
                password_hasher: hasher,
                clock: clock.clone(),
            },
            &config.jwt,
            &config.session,
        ));
        let authorizer = Arc::new(MembershipAuthorizer::new(clock.clone()));

        let users = UserService::new(
            UserServiceDependencies {
                store: Arc::new(store.clone()),
                session: session.clone(),
                avatar_storage,
                clock: clock.clone(),
            },
            &config.avatar,
        );
        let rooms = RoomService::new(
            RoomServiceDependencies {
                store: Arc::new(store.clone()),
                authorizer: authorizer.clone(),
                clock: clock.clone(),
            },
            &config.messaging,
        );
        let messages = MessageService::new(
            MessageServiceDependencies {
                store: Arc::new(store.clone()),
                authorizer,
                clock: clock.clone(),
            },
            &config.messaging,
        );

        Self {
            store,
            clock,
            session,
            users,
            rooms,
            messages,
        }
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> (User, SessionTokens) {
        let outcome = self
            .users
            .register(RegisterUserRequest {
                name: name.into(),
                email: email.into(),
                password: password.into(),
            })
            .await
            .expect("registration succeeds");
        (outcome.user, outcome.tokens)
    }

    pub async fn room(&self, creator: UserId, name: &str, members: &[UserId]) -> ChatRoom {
        self.rooms
            .create_room(CreateRoomRequest {
                creator_id: creator,
                name: name.into(),
                is_group_chat: true,
                member_ids: members.to_vec(),
            })
            .await
            .expect("room creation succeeds")
            .room
    }
}

#[tokio::test]
async fn end_to_end_register_login_room_and_message() {
    use crate::services::{AuthenticateUserRequest, ListMessagesQuery, SendMessageRequest};

    let harness = Harness::new();
    harness.register("User A", "a@x.com", "Passw0rd1").await;

    let login = harness
        .users
        .login(AuthenticateUserRequest {
            email: "a@x.com".into(),
            password: "Passw0rd1".into(),
        })
        .await
        .unwrap();
    let principal = harness
        .session
        .verify_access_token(&login.tokens.access_token.token)
        .unwrap();
    assert!(!login.tokens.refresh_token.as_str().is_empty());

    let details = harness
        .rooms
        .create_room(CreateRoomRequest {
            creator_id: principal.user_id,
            name: "Team".into(),
            is_group_chat: true,
            member_ids: vec![],
        })
        .await
        .unwrap();
    assert_eq!(details.members.len(), 1);
    assert_eq!(details.members[0].user.id, principal.user_id);

    let sent = harness
        .messages
        .send_message(SendMessageRequest {
            room_id: details.room.id,
            sender_id: principal.user_id,
            content: "hi".into(),
            attachment_url: None,
        })
        .await
        .unwrap();

    let page = harness
        .messages
        .list_messages(ListMessagesQuery {
            room_id: details.room.id,
            requester_id: principal.user_id,
            before: None,
            page_size: Some(10),
        })
        .await
        .unwrap();
    assert_eq!(page.messages[0].message.id, sent.message.id);
    assert_eq!(page.messages[0].sender.name.as_str(), "User A");
}
