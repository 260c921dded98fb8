/// 嵌入式迁移，启动时与集成测试共用。
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
