use std::sync::Arc;

use application::{MessageService, RoomService, SessionManager, UserService};
use config::AppConfig;

use crate::cookie::RefreshCookie;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserService>,
    pub rooms: Arc<RoomService>,
    pub messages: Arc<MessageService>,
    pub session: Arc<SessionManager>,
    pub refresh_cookie: RefreshCookie,
    pub cors_origins: Vec<String>,
    pub avatar_max_bytes: usize,
}

impl AppState {
    pub fn new(
        users: Arc<UserService>,
        rooms: Arc<RoomService>,
        messages: Arc<MessageService>,
        session: Arc<SessionManager>,
        config: &AppConfig,
    ) -> Self {
        Self {
            users,
            rooms,
            messages,
            session,
            refresh_cookie: RefreshCookie::from_config(config),
            cors_origins: config.server.cors_origins.clone(),
            avatar_max_bytes: config.avatar.max_bytes,
        }
    }
}
