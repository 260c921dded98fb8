use std::sync::Arc;

use application::{AvatarStorage, PasswordHasher};
use config::AppConfig;
use thiserror::Error;

use crate::{
    avatar::LocalAvatarStorage,
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 进程级适配器集合：连接池、密码哈希与头像存储。
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<PgStore>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
    pub avatar_storage: Arc<LocalAvatarStorage>,
}

impl Infrastructure {
    /// 建立连接池并执行迁移。
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库迁移完成");

        Ok(Self {
            store: Arc::new(PgStore::new(pool)),
            password_hasher: Arc::new(BcryptPasswordHasher::new(config.server.bcrypt_cost)),
            avatar_storage: Arc::new(LocalAvatarStorage::new(&config.avatar)),
        })
    }

    pub fn password_hasher_trait(&self) -> Arc<dyn PasswordHasher> {
        self.password_hasher.clone()
    }

    pub fn avatar_storage_trait(&self) -> Arc<dyn AvatarStorage> {
        self.avatar_storage.clone()
    }
}
