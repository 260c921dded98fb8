use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;
use validator::ValidationErrors;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    /// 认证中间件的统一失败响应，不透露失败原因。
    pub fn invalid_token() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "invalid or missing token")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(errors: ValidationErrors) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", errors.to_string())
    }

    /// 内部错误只记录日志，响应体不带细节。
    fn internal(detail: impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "请求处理失败");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal server error",
        )
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use ApplicationError as AppErr;

        match error {
            AppErr::Domain(err) => err.into(),
            AppErr::Repository(RepositoryError::NotFound) => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "requested resource not found",
            ),
            AppErr::Repository(RepositoryError::Conflict) => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
            }
            AppErr::Repository(err @ RepositoryError::Storage { .. }) => {
                ApiError::internal(format!("{err:?}"))
            }
            AppErr::Password(err) => ApiError::internal(err),
            AppErr::Infrastructure(message) => ApiError::internal(message),
            AppErr::InvalidCredentials => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "invalid email or password",
            ),
            AppErr::TokenInvalid => ApiError::invalid_token(),
            AppErr::TokenExpired => {
                ApiError::new(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", "token expired")
            }
            AppErr::RefreshTokenNotFound => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_REFRESH_TOKEN",
                "refresh token not recognised",
            ),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::InvalidArgument { field, reason } => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{field}: {reason}"),
            ),
            DomainError::UserAlreadyExists => {
                ApiError::new(StatusCode::CONFLICT, "USER_EXISTS", "user already exists")
            }
            DomainError::UserNotFound => {
                ApiError::new(StatusCode::NOT_FOUND, "USER_NOT_FOUND", "user not found")
            }
            DomainError::RoomNotFound => {
                ApiError::new(StatusCode::NOT_FOUND, "ROOM_NOT_FOUND", "room not found")
            }
            DomainError::MessageNotFound => ApiError::new(
                StatusCode::NOT_FOUND,
                "MESSAGE_NOT_FOUND",
                "message not found",
            ),
            DomainError::MembershipNotFound => ApiError::new(
                StatusCode::NOT_FOUND,
                "MEMBERSHIP_NOT_FOUND",
                "user is not a member of this room",
            ),
            DomainError::UserAlreadyInRoom => ApiError::new(
                StatusCode::CONFLICT,
                "MEMBERSHIP_EXISTS",
                "user already joined room",
            ),
            DomainError::UserNotInRoom => {
                ApiError::new(StatusCode::FORBIDDEN, "NOT_ROOM_MEMBER", "user not in room")
            }
            DomainError::NotMessageOwner => ApiError::new(
                StatusCode::FORBIDDEN,
                "NOT_MESSAGE_OWNER",
                "only the sender may modify this message",
            ),
            DomainError::UnknownMember => ApiError::new(
                StatusCode::BAD_REQUEST,
                "UNKNOWN_MEMBER",
                "one or more members do not exist",
            ),
            DomainError::EditWindowExpired => ApiError::new(
                StatusCode::BAD_REQUEST,
                "EDIT_WINDOW_EXPIRED",
                "message can no longer be edited",
            ),
            err @ DomainError::InvalidRefreshCredential { .. } => ApiError::internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: impl Into<ApiError>) -> (StatusCode, &'static str) {
        let api = error.into();
        (api.status(), api.code())
    }

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(
            status_of(ApplicationError::InvalidCredentials),
            (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS")
        );
        assert_eq!(
            status_of(ApplicationError::RefreshTokenNotFound).0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(ApplicationError::Domain(DomainError::UserNotInRoom)).0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ApplicationError::Domain(DomainError::NotMessageOwner)).0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ApplicationError::Domain(DomainError::RoomNotFound)).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApplicationError::Domain(DomainError::UserAlreadyInRoom)).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ApplicationError::Domain(DomainError::EditWindowExpired)).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApplicationError::Domain(DomainError::UnknownMember)).0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn storage_errors_do_not_leak_details() {
        let api = ApiError::from(ApplicationError::Repository(RepositoryError::storage(
            "connection refused at 10.0.0.3",
        )));
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body.message, "internal server error");
    }
}
