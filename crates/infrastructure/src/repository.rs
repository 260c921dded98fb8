//! PostgreSQL 存储实现。
//!
//! 每个 [`PgTransaction`] 包装一个 `sqlx::Transaction`，所有仓储方法都在该事务的
//! 连接上执行。未提交即被丢弃的事务由 sqlx 自动回滚。

use application::repository::{
    CredentialRepository, MembershipRepository, MessageRepository, RoomRepository,
    StoreTransaction, TransactionManager, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatRoom, Credentials, DisplayName, MemberWithUser, Message, MessageContent, MessageCursor,
    MessageId, MessageWithSender, PasswordHash, RefreshCredential, RefreshTokenHash,
    RepositoryError, RoomId, RoomMember, Timestamp, User, UserEmail, UserId,
};
use futures::future::BoxFuture;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// 唯一约束冲突映射为 `Conflict`，其余数据库错误归为 `Storage`。
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const USER_COLUMNS: &str = "id, name, email, bio, profile_image_url, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    email: String,
    bio: Option<String>,
    profile_image_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let name = DisplayName::parse(value.name).map_err(|err| invalid_data(err.to_string()))?;
        let email = UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            name,
            email,
            bio: value.bio,
            profile_image_url: value.profile_image_url,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CredentialRecord {
    id: Uuid,
    email: String,
    password_hash: String,
    refresh_token_hash: Option<Vec<u8>>,
    refresh_token_expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<CredentialRecord> for Credentials {
    type Error = RepositoryError;

    fn try_from(value: CredentialRecord) -> Result<Self, Self::Error> {
        let refresh =
            RefreshCredential::from_columns(value.refresh_token_hash, value.refresh_token_expires_at)
                .map_err(|err| invalid_data(err.to_string()))?;
        Ok(Credentials {
            user_id: UserId::from(value.id),
            email: UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?,
            password: PasswordHash::new(value.password_hash)
                .map_err(|err| invalid_data(err.to_string()))?,
            refresh,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: String,
    is_group_chat: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoomRecord> for ChatRoom {
    fn from(value: RoomRecord) -> Self {
        ChatRoom {
            id: RoomId::from(value.id),
            name: value.name,
            is_group_chat: value.is_group_chat,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    room_id: Uuid,
    user_id: Uuid,
    joined_at: DateTime<Utc>,
    name: String,
    email: String,
    bio: Option<String>,
    profile_image_url: Option<String>,
    user_created_at: DateTime<Utc>,
    user_updated_at: DateTime<Utc>,
}

impl TryFrom<MemberRecord> for MemberWithUser {
    type Error = RepositoryError;

    fn try_from(value: MemberRecord) -> Result<Self, Self::Error> {
        let user = User::try_from(UserRecord {
            id: value.user_id,
            name: value.name,
            email: value.email,
            bio: value.bio,
            profile_image_url: value.profile_image_url,
            created_at: value.user_created_at,
            updated_at: value.user_updated_at,
        })?;
        Ok(MemberWithUser {
            member: RoomMember::new(
                RoomId::from(value.room_id),
                UserId::from(value.user_id),
                value.joined_at,
            ),
            user,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    user_id: Uuid,
    content: String,
    file_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.user_id),
            content,
            attachment_url: value.file_url,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageWithSenderRecord {
    #[sqlx(flatten)]
    message: MessageRecord,
    sender_name: String,
    sender_email: String,
    sender_bio: Option<String>,
    sender_profile_image_url: Option<String>,
    sender_created_at: DateTime<Utc>,
    sender_updated_at: DateTime<Utc>,
}

impl TryFrom<MessageWithSenderRecord> for MessageWithSender {
    type Error = RepositoryError;

    fn try_from(value: MessageWithSenderRecord) -> Result<Self, Self::Error> {
        let sender = User::try_from(UserRecord {
            id: value.message.user_id,
            name: value.sender_name,
            email: value.sender_email,
            bio: value.sender_bio,
            profile_image_url: value.sender_profile_image_url,
            created_at: value.sender_created_at,
            updated_at: value.sender_updated_at,
        })?;
        Ok(MessageWithSender {
            message: Message::try_from(value.message)?,
            sender,
        })
    }
}

const MESSAGE_WITH_SENDER_SELECT: &str = r#"
    SELECT m.id, m.room_id, m.user_id, m.content, m.file_url,
           m.created_at, m.updated_at, m.deleted_at,
           u.name AS sender_name, u.email AS sender_email, u.bio AS sender_bio,
           u.profile_image_url AS sender_profile_image_url,
           u.created_at AS sender_created_at, u.updated_at AS sender_updated_at
    FROM messages m
    JOIN users u ON u.id = m.user_id
"#;

/// `ILIKE` 模式中的通配符需要转义，用户输入只做字面匹配。
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn to_i64(value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| invalid_data("value out of range"))
}

fn to_u64(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| invalid_data("negative count"))
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionManager for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, RepositoryError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl StoreTransaction for PgTransaction {
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), RepositoryError>> {
        let PgTransaction { tx } = *self;
        Box::pin(async move { tx.commit().await.map_err(map_sqlx_err) })
    }
}

#[async_trait]
impl UserRepository for PgTransaction {
    async fn find_user_by_id(&mut self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn find_user_by_email(
        &mut self,
        email: &UserEmail,
    ) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn find_users_by_ids(&mut self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| Uuid::from(*id)).collect();
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(User::try_from).collect()
    }

    async fn update_profile(&mut self, user: &User) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, bio = $3, profile_image_url = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.name.as_str())
        .bind(user.bio.as_deref())
        .bind(user.profile_image_url.as_deref())
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn search_users(
        &mut self,
        query: &str,
        limit: u32,
    ) -> Result<(Vec<User>, u64), RepositoryError> {
        let pattern = like_pattern(query);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE name ILIKE $1 OR email ILIKE $1",
        )
        .bind(&pattern)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE name ILIKE $1 OR email ILIKE $1 \
             ORDER BY name, id LIMIT $2"
        ))
        .bind(&pattern)
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((users, to_u64(total)?))
    }
}

#[async_trait]
impl CredentialRepository for PgTransaction {
    async fn create_account(
        &mut self,
        user: &User,
        password: &PasswordHash,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, bio, profile_image_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.name.as_str())
        .bind(user.email.as_str())
        .bind(password.as_str())
        .bind(user.bio.as_deref())
        .bind(user.profile_image_url.as_deref())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_credentials_by_email(
        &mut self,
        email: &UserEmail,
    ) -> Result<Option<Credentials>, RepositoryError> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            r#"
            SELECT id, email, password_hash, refresh_token_hash, refresh_token_expires_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Credentials::try_from).transpose()
    }

    async fn find_credentials_by_refresh_hash(
        &mut self,
        hash: &RefreshTokenHash,
    ) -> Result<Option<Credentials>, RepositoryError> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            r#"
            SELECT id, email, password_hash, refresh_token_hash, refresh_token_expires_at
            FROM users
            WHERE refresh_token_hash = $1
            FOR UPDATE
            "#,
        )
        .bind(hash.as_bytes())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Credentials::try_from).transpose()
    }

    async fn store_refresh_credential(
        &mut self,
        user_id: UserId,
        credential: Option<&RefreshCredential>,
    ) -> Result<(), RepositoryError> {
        let (hash, expires_at): (Option<&[u8]>, Option<Timestamp>) =
            RefreshCredential::to_columns(credential);
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token_hash = $2, refresh_token_expires_at = $3
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(hash)
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn clear_refresh_by_hash(
        &mut self,
        hash: &RefreshTokenHash,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token_hash = NULL, refresh_token_expires_at = NULL
            WHERE refresh_token_hash = $1
            "#,
        )
        .bind(hash.as_bytes())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RoomRepository for PgTransaction {
    async fn insert_room(&mut self, room: &ChatRoom) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO chat_rooms (id, name, is_group_chat, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(room.id))
        .bind(&room.name)
        .bind(room.is_group_chat)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_room(&mut self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            "SELECT id, name, is_group_chat, created_at, updated_at FROM chat_rooms WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(ChatRoom::from))
    }

    async fn update_room(&mut self, room: &ChatRoom) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE chat_rooms SET name = $2, updated_at = $3 WHERE id = $1")
            .bind(Uuid::from(room.id))
            .bind(&room.name)
            .bind(room.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_rooms_for_user(
        &mut self,
        user_id: UserId,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<ChatRoom>, u64), RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM room_members WHERE user_id = $1")
            .bind(Uuid::from(user_id))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_err)?;

        let records = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT r.id, r.name, r.is_group_chat, r.created_at, r.updated_at
            FROM chat_rooms r
            JOIN room_members rm ON rm.room_id = r.id
            WHERE rm.user_id = $1
            ORDER BY r.updated_at DESC, r.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(i64::from(limit))
        .bind(to_i64(offset)?)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok((
            records.into_iter().map(ChatRoom::from).collect(),
            to_u64(total)?,
        ))
    }
}

#[async_trait]
impl MembershipRepository for PgTransaction {
    async fn membership_exists(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM room_members WHERE room_id = $1 AND user_id = $2)",
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)
    }

    async fn insert_membership(&mut self, member: &RoomMember) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO room_members (room_id, user_id, joined_at) VALUES ($1, $2, $3)")
            .bind(Uuid::from(member.room_id))
            .bind(Uuid::from(member.user_id))
            .bind(member.joined_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn delete_membership(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM room_members WHERE room_id = $1 AND user_id = $2")
            .bind(Uuid::from(room_id))
            .bind(Uuid::from(user_id))
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_members(
        &mut self,
        room_id: RoomId,
    ) -> Result<Vec<MemberWithUser>, RepositoryError> {
        let records = sqlx::query_as::<_, MemberRecord>(
            r#"
            SELECT rm.room_id, rm.user_id, rm.joined_at,
                   u.name, u.email, u.bio, u.profile_image_url,
                   u.created_at AS user_created_at, u.updated_at AS user_updated_at
            FROM room_members rm
            JOIN users u ON u.id = rm.user_id
            WHERE rm.room_id = $1
            ORDER BY rm.joined_at ASC, rm.user_id ASC
            "#,
        )
        .bind(Uuid::from(room_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(MemberWithUser::try_from).collect()
    }

    async fn count_members(&mut self, room_id: RoomId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM room_members WHERE room_id = $1")
            .bind(Uuid::from(room_id))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_err)?;
        to_u64(count)
    }
}

#[async_trait]
impl MessageRepository for PgTransaction {
    async fn insert_message(&mut self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, room_id, user_id, content, file_url, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.attachment_url.as_deref())
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_message(
        &mut self,
        id: MessageId,
        include_deleted: bool,
    ) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, room_id, user_id, content, file_url, created_at, updated_at, deleted_at
            FROM messages
            WHERE id = $1 AND ($2 OR deleted_at IS NULL)
            "#,
        )
        .bind(Uuid::from(id))
        .bind(include_deleted)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn update_message(&mut self, message: &Message) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = $2, file_url = $3, updated_at = $4, deleted_at = $5
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(message.content.as_str())
        .bind(message.attachment_url.as_deref())
        .bind(message.updated_at)
        .bind(message.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_messages(
        &mut self,
        room_id: RoomId,
        before: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<MessageWithSender>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageWithSenderRecord>(&format!(
            "{MESSAGE_WITH_SENDER_SELECT} \
             WHERE m.room_id = $1 AND m.deleted_at IS NULL \
               AND ($2::timestamptz IS NULL OR (m.created_at, m.id) < ($2, $3::uuid)) \
             ORDER BY m.created_at DESC, m.id DESC \
             LIMIT $4"
        ))
        .bind(Uuid::from(room_id))
        .bind(before.map(|cursor| cursor.created_at))
        .bind(before.map(|cursor| Uuid::from(cursor.id)))
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(MessageWithSender::try_from).collect()
    }

    async fn latest_message(
        &mut self,
        room_id: RoomId,
    ) -> Result<Option<MessageWithSender>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageWithSenderRecord>(&format!(
            "{MESSAGE_WITH_SENDER_SELECT} \
             WHERE m.room_id = $1 AND m.deleted_at IS NULL \
             ORDER BY m.created_at DESC, m.id DESC \
             LIMIT 1"
        ))
        .bind(Uuid::from(room_id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        record.map(MessageWithSender::try_from).transpose()
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
