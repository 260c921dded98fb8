//! 主应用程序入口
//!
//! 加载配置、连接数据库并执行迁移，组装服务后启动 Axum Web API。

use std::sync::Arc;

use anyhow::Context;
use application::{
    Clock, MembershipAuthorizer, MessageService, MessageServiceDependencies, RoomService,
    RoomServiceDependencies, SessionManager, SessionManagerDependencies, SystemClock,
    UserService, UserServiceDependencies,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tower_http::services::ServeDir;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    info!(environment = ?config.environment, "配置已加载");

    let infra = Infrastructure::connect(&config)
        .await
        .context("初始化数据库失败")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let session = Arc::new(SessionManager::new(
        SessionManagerDependencies {
            store: infra.store.clone(),
            password_hasher: infra.password_hasher_trait(),
            clock: clock.clone(),
        },
        &config.jwt,
        &config.session,
    ));
    let authorizer = Arc::new(MembershipAuthorizer::new(clock.clone()));

    let users = Arc::new(UserService::new(
        UserServiceDependencies {
            store: infra.store.clone(),
            session: session.clone(),
            avatar_storage: infra.avatar_storage_trait(),
            clock: clock.clone(),
        },
        &config.avatar,
    ));
    let rooms = Arc::new(RoomService::new(
        RoomServiceDependencies {
            store: infra.store.clone(),
            authorizer: authorizer.clone(),
            clock: clock.clone(),
        },
        &config.messaging,
    ));
    let messages = Arc::new(MessageService::new(
        MessageServiceDependencies {
            store: infra.store.clone(),
            authorizer,
            clock,
        },
        &config.messaging,
    ));

    let state = AppState::new(users, rooms, messages, session, &config);
    let app = router(state).nest_service("/uploads", ServeDir::new(&config.avatar.storage_dir));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;

    info!("聊天服务器启动在 http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "无法监听 Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "无法注册 SIGTERM 处理器");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到 Ctrl+C，正在关闭"),
        _ = terminate => info!("收到 SIGTERM，正在关闭"),
    }
}
