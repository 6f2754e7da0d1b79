use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

// Convert from various error types
impl From<vigil_core::VigilError> for AppError {
    fn from(err: vigil_core::VigilError) -> Self {
        use vigil_core::VigilError;
        match err {
            VigilError::Validation(msg) => Self::bad_request(msg),
            VigilError::NotFound(msg) => Self::not_found(msg),
            // Raw infrastructure errors never cross the API boundary.
            VigilError::Database(_) | VigilError::Io(_) | VigilError::Serialization(_) => {
                Self::internal("internal server error")
            }
            VigilError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::VigilError;

    #[test]
    fn core_errors_map_to_expected_statuses() {
        let bad = AppError::from(VigilError::Validation("target must not be empty".into()));
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let missing = AppError::from(VigilError::NotFound("scan x not found".into()));
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let broken = AppError::from(VigilError::Internal("enqueue failed".into()));
        assert_eq!(broken.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn infrastructure_errors_are_not_leaked() {
        let err = AppError::from(VigilError::Database(sqlx::Error::PoolClosed));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal server error");
    }
}
