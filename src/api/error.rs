//! API error handling for consistent JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::MeetingError;

/// API error type that converts to JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<MeetingError> for ApiError {
    fn from(err: MeetingError) -> Self {
        let status = match &err {
            MeetingError::NotConnected | MeetingError::InvalidState(_) => StatusCode::CONFLICT,
            MeetingError::ScreenShare(_) | MeetingError::DeviceAcquisition(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            MeetingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            MeetingError::TokenFetch(_)
            | MeetingError::RoomConnect(_)
            | MeetingError::PresenceChannel(_)
            | MeetingError::FeedbackSubmit(_) => StatusCode::BAD_GATEWAY,
            MeetingError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
