//! 基础设施层实现。
//!
//! 提供 PostgreSQL 事务存储、bcrypt 密码哈希与本地头像存储，实现应用层定义的接口。

pub mod avatar;
pub mod builder;
pub mod migrations;
pub mod password;
pub mod repository;

pub use avatar::LocalAvatarStorage;
pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use repository::{create_pg_pool, PgStore, PgTransaction};
