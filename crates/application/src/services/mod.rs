mod membership;
mod message_service;
mod room_service;
mod session_manager;
mod user_service;

pub use membership::MembershipAuthorizer;
pub use message_service::{
    ListMessagesQuery, MessagePage, MessageService, MessageServiceDependencies,
    SendMessageRequest,
};
pub use room_service::{
    CreateRoomRequest, RoomDetails, RoomPage, RoomService, RoomServiceDependencies, RoomSummary,
};
pub use session_manager::{SessionManager, SessionManagerDependencies, SessionTokens};
pub use user_service::{
    AuthOutcome, AuthenticateUserRequest, RegisterUserRequest, UserSearchResult, UserService,
    UserServiceDependencies,
};
