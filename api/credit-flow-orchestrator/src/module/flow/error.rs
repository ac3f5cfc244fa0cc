use crate::errors::FlowError;
use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, code, message)
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    fn with_status(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<FlowError> for AppError {
    fn from(err: FlowError) -> Self {
        let status = match &err {
            FlowError::InvalidSubjectId(_)
            | FlowError::InvalidPhoneFormat { .. }
            | FlowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FlowError::LeadNotFound(_) => StatusCode::NOT_FOUND,
            FlowError::IncompleteLead(_)
            | FlowError::PhoneAlreadyRegistered(_)
            | FlowError::DocumentNotSigned { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            FlowError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            FlowError::TokenUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FlowError::NoDocumentId
            | FlowError::EmptyResponse(_)
            | FlowError::Partner(_)
            | FlowError::Transport(_)
            | FlowError::LinksExhausted { .. } => StatusCode::BAD_GATEWAY,
            FlowError::SignatureDispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::with_status(status, err.code(), err.to_string())
    }
}
